use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;
use {Error, Reason, Result, Value};

/// Pack coil values into the byte string carried by a bit-read response.
///
/// Bits fill each byte least-significant first. The trailing partial
/// group of `len % 8` values is emitted before the full groups, which
/// follow in front-to-back order; peers depend on exactly this layout.
pub fn pack_bits(bits: &[Value]) -> Vec<u8> {
    let full = bits.len() / 8;
    let mut res = Vec::with_capacity(full + 1);
    if bits.len() % 8 > 0 {
        res.push(pack_byte(&bits[full * 8..]));
    }
    for group in bits[..full * 8].chunks(8) {
        res.push(pack_byte(group));
    }
    res
}

fn pack_byte(bits: &[Value]) -> u8 {
    let mut b = 0u8;
    for (i, v) in bits.iter().enumerate() {
        b |= ((v.0 & 1) as u8) << i;
    }
    b
}

pub fn unpack_bytes(data: &[Value]) -> Vec<u8> {
    let size = data.len();
    let mut res = Vec::with_capacity(size * 2);
    for v in data {
        res.push((v.0 >> 8 & 0xff) as u8);
        res.push((v.0 & 0xff) as u8);
    }
    res
}

pub fn pack_bytes(bytes: &[u8]) -> Result<Vec<Value>> {
    let size = bytes.len();
    // check if we can create u16s from bytes by packing two u8s together without rest
    if size % 2 != 0 {
        return Err(Error::InvalidData(Reason::BytecountNotEven));
    }

    let mut res = Vec::with_capacity(size / 2);
    let mut rdr = Cursor::new(bytes);
    for _ in 0..size / 2 {
        res.push(Value(rdr.read_u16::<BigEndian>()?));
    }
    Ok(res)
}

#[cfg(test)]
fn coils(bits: &[u16]) -> Vec<Value> {
    bits.iter().map(|b| Value(*b)).collect()
}

#[test]
fn test_pack_bits() {
    assert_eq!(pack_bits(&[]), &[]);
    assert_eq!(pack_bits(&coils(&[1])), &[1]);
    assert_eq!(pack_bits(&coils(&[0, 1])), &[2]);
    assert_eq!(pack_bits(&coils(&[0, 1, 1, 1])), &[0x0e]);
    assert_eq!(pack_bits(&coils(&[1, 0, 0, 0, 0, 0, 0, 1])), &[0x81]);
    assert_eq!(pack_bits(&coils(&[1, 0, 1, 0, 1, 0, 1, 0, 1])), &[0x01, 0x55]);
    assert_eq!(pack_bits(&coils(&[1, 0, 0, 0, 0, 0, 0, 0,
                                  1, 0, 0, 0, 0, 0, 0, 0,
                                  0])),
               &[0x00, 0x01, 0x01]);
    // only the low bit of a value counts
    assert_eq!(pack_bits(&[Value(0xff00), Value(0xff01)]), &[2]);
}

#[test]
fn test_unpack_bytes() {
    assert_eq!(unpack_bytes(&[]), &[]);
    assert_eq!(unpack_bytes(&[Value(0)]), &[0, 0]);
    assert_eq!(unpack_bytes(&[Value(1)]), &[0, 1]);
    assert_eq!(unpack_bytes(&[Value(0xffff)]), &[0xff, 0xff]);
    assert_eq!(unpack_bytes(&[Value(0xffff), Value(0x0001)]),
               &[0xff, 0xff, 0x00, 0x01]);
    assert_eq!(unpack_bytes(&[Value(0xffff), Value(0x1001)]),
               &[0xff, 0xff, 0x10, 0x01]);
}

#[test]
fn test_pack_bytes() {
    assert_eq!(pack_bytes(&[]).unwrap(), &[]);
    assert_eq!(pack_bytes(&[0, 0]).unwrap(), &[Value(0)]);
    assert_eq!(pack_bytes(&[0, 1]).unwrap(), &[Value(1)]);
    assert_eq!(pack_bytes(&[1, 0]).unwrap(), &[Value(256)]);
    assert_eq!(pack_bytes(&[0, 1, 0, 2]).unwrap(), &[Value(1), Value(2)]);
    assert_eq!(pack_bytes(&[0x3c, 0x13, 0x01, 0x00]).unwrap(),
               &[Value(0x3c13), Value(0x0100)]);
    assert!(pack_bytes(&[1]).is_err());
    assert!(pack_bytes(&[1, 2, 3]).is_err());
}
