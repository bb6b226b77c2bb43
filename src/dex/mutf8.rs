//! Modified UTF-8 as used by `string_data_item`.
//!
//! The length prefix counts UTF-16 code units, not bytes. `U+0000` is stored as the
//! overlong pair `C0 80` so the only real `0x00` byte is the terminator, and characters
//! outside the BMP are stored as two encoded surrogates (CESU-8). Each code unit is
//! encoded on its own, so an unpaired surrogate is legal and has to survive a merge.

use std::fmt;

use cesu8::{from_java_cesu8, to_java_cesu8};

use crate::dex::error::DexError;
use crate::dex::{read_u1, read_uleb128};

/// A string table entry as UTF-16 code units.
///
/// Ordering is by code unit, which is what the runtime binary-searches on. Almost every
/// entry is also valid Unicode; [`DexString::as_str`] is exact for those and lossy for
/// the rest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DexString
{
    units: Vec<u16>,
    text: String,
}

impl DexString
{
    pub fn from_units(units: Vec<u16>) -> Self
    {
        let text = String::from_utf16_lossy(&units);
        DexString { units, text }
    }

    pub fn units(&self) -> &[u16]
    {
        &self.units
    }

    pub fn utf16_len(&self) -> u32
    {
        self.units.len() as u32
    }

    pub fn as_str(&self) -> &str
    {
        &self.text
    }

    /// False when the entry holds an unpaired surrogate.
    pub fn is_unicode(&self) -> bool
    {
        self.text.encode_utf16().eq(self.units.iter().copied())
    }
}

impl From<&str> for DexString
{
    fn from(s: &str) -> Self
    {
        DexString { units: s.encode_utf16().collect(), text: s.to_string() }
    }
}

impl PartialEq<str> for DexString
{
    fn eq(&self, other: &str) -> bool
    {
        self.is_unicode() && self.text == other
    }
}

impl PartialEq<&str> for DexString
{
    fn eq(&self, other: &&str) -> bool
    {
        self == *other
    }
}

impl fmt::Display for DexString
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(&self.text)
    }
}

/// Reads a `string_data_item` at `ix`: uleb128 UTF-16 size, the encoded characters and
/// the trailing NUL.
pub fn read_string_data(bytes: &[u8], ix: &mut usize) -> Result<DexString, DexError>
{
    let start = *ix;
    let utf16_size = read_uleb128(bytes, ix)?;
    let data_start = *ix;
    let mut units = Vec::with_capacity(utf16_size.min(0x1000) as usize);

    for _ in 0..utf16_size
    {
        let lead = read_u1(bytes, ix)?;
        let (continuation, mut unit, min) = match lead
        {
            0x00 => return Err(mutf8_error("embedded NUL byte", start)),
            0x01..=0x7f => (0, lead as u16, 0),
            _ if lead & 0xe0 == 0xc0 => (1, (lead & 0x1f) as u16, 0x80),
            _ if lead & 0xf0 == 0xe0 => (2, (lead & 0x0f) as u16, 0x800),
            _ => return Err(mutf8_error(&format!("bad lead byte 0x{:02x}", lead), start)),
        };
        for _ in 0..continuation
        {
            let b = read_u1(bytes, ix)?;
            if b & 0xc0 != 0x80
            {
                return Err(mutf8_error(&format!("bad continuation byte 0x{:02x}", b), start));
            }
            unit = (unit << 6) | (b & 0x3f) as u16;
        }
        // C0 80 is the one overlong form allowed
        if unit < min && !(continuation == 1 && unit == 0)
        {
            return Err(mutf8_error(&format!("overlong encoding of U+{:04X}", unit), start));
        }
        units.push(unit);
    }

    let data_end = *ix;
    if read_u1(bytes, ix)? != 0
    {
        return Err(mutf8_error("missing NUL terminator", start));
    }

    match from_java_cesu8(&bytes[data_start..data_end])
    {
        Ok(text) => Ok(DexString { units, text: text.into_owned() }),
        Err(_) if String::from_utf16(&units).is_err() => Ok(DexString::from_units(units)),
        Err(_) => Err(mutf8_error("invalid modified UTF-8", start)),
    }
}

/// Encodes a `string_data_item` for `s`.
pub fn write_string_data(buffer: &mut Vec<u8>, s: &DexString) -> usize
{
    let mut c = crate::dex::write_uleb128(buffer, s.utf16_len());
    if s.is_unicode()
    {
        c += crate::dex::write_x(buffer, &to_java_cesu8(s.as_str()));
    }
    else
    {
        for unit in s.units()
        {
            c += write_unit(buffer, *unit);
        }
    }
    c += crate::dex::write_u1(buffer, 0);
    c
}

fn write_unit(buffer: &mut Vec<u8>, unit: u16) -> usize
{
    match unit
    {
        0x0001..=0x007f => crate::dex::write_u1(buffer, unit as u8),
        0x0000 | 0x0080..=0x07ff => crate::dex::write_x(buffer, &[0xc0 | (unit >> 6) as u8, 0x80 | (unit & 0x3f) as u8]),
        _ => crate::dex::write_x(buffer, &[
            0xe0 | (unit >> 12) as u8,
            0x80 | ((unit >> 6) & 0x3f) as u8,
            0x80 | (unit & 0x3f) as u8,
        ]),
    }
}

fn mutf8_error(what: &str, offset: usize) -> DexError
{
    DexError::encoding(&format!("{} in string_data_item at 0x{:x}", what, offset))
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::*;
    use crate::dex::error::DexErrorKind;

    fn roundtrip(s: &str) -> Vec<u8> {
        let mut buf = vec![];
        write_string_data(&mut buf, &DexString::from(s));
        let mut ix = 0;
        assert_eq!(read_string_data(&buf, &mut ix).unwrap(), s);
        assert_eq!(ix, buf.len());
        buf
    }

    #[test]
    fn ascii() {
        assert_eq!(roundtrip("Lfoo/Bar;"), b"\x09Lfoo/Bar;\x00".to_vec());
    }

    #[test]
    fn embedded_nul_is_overlong() {
        let buf = roundtrip("a\u{0}b");
        assert_eq!(buf, vec![0x03, b'a', 0xc0, 0x80, b'b', 0x00]);
    }

    #[test]
    fn supplementary_counts_two_units() {
        let buf = roundtrip("\u{1F600}");
        assert_eq!(buf[0], 2);
        assert_eq!(buf.len(), 1 + 6 + 1);
    }

    #[test]
    fn unpaired_surrogates_survive() {
        let lone = [0x01, 0xed, 0xa0, 0x80, 0x00];
        let s = read_string_data(&lone, &mut 0).unwrap();
        assert_eq!(s.units(), &[0xd800]);
        assert!(!s.is_unicode());
        assert_ne!(s, "\u{FFFD}");

        let mut buf = vec![];
        write_string_data(&mut buf, &s);
        assert_eq!(buf, lone.to_vec());

        // a trailing surrogate after a letter, in a string longer than one unit
        let mixed = [0x02, b'x', 0xed, 0xbf, 0xbf, 0x00];
        let s = read_string_data(&mixed, &mut 0).unwrap();
        assert_eq!(s.units(), &[0x78, 0xdfff]);
        let mut buf = vec![];
        write_string_data(&mut buf, &s);
        assert_eq!(buf, mixed.to_vec());
    }

    #[test]
    fn decoding_stops_by_unit_count() {
        // Declared length 1 but two characters precede the NUL.
        let e = read_string_data(&[0x01, b'a', b'b', 0x00], &mut 0).unwrap_err();
        assert_eq!(e.kind(), &DexErrorKind::Encoding);
    }

    #[test]
    fn invalid_sequence_is_fatal() {
        let e = read_string_data(&[0x01, 0xf0, 0x90, 0x80, 0x80, 0x00], &mut 0).unwrap_err();
        assert_eq!(e.kind(), &DexErrorKind::Encoding);
        let e = read_string_data(&[0x01, 0xe0, 0x81, 0x81, 0x00], &mut 0).unwrap_err();
        assert!(e.to_string().contains("overlong"), "{}", e);
    }

    #[test]
    fn utf16_order() {
        let s = |text: &str| DexString::from(text);
        // U+FFFD sorts before a surrogate pair in UTF-8 order but after it in UTF-16 order.
        assert_eq!(s("\u{FFFD}").cmp(&s("\u{1F600}")), Ordering::Greater);
        assert_eq!(s("a\u{0}").cmp(&s("a\u{1}")), Ordering::Less);
        assert_eq!(s("abc").cmp(&s("abd")), Ordering::Less);
        assert_eq!(s("ab").cmp(&s("abc")), Ordering::Less);
        assert_eq!(DexString::from_units(vec![0xd800]).cmp(&s("\u{E000}")), Ordering::Less);
    }
}
