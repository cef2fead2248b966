//! Storage sizes
//!
//! [`Size`] is an exact quantity of bytes together with the unit it is
//! displayed in. Units are binary multiples (`1K = 1024 bytes`). Values are
//! kept as signed nano-bytes, so fractional inputs such as `10.75M` or
//! `0.5t` compare and add without rounding.
//!
//! [`AlignedSize`] models an appliance that reports a human-rounded size
//! while the volume really holds a whole number of 512-byte blocks, rounded
//! up to the disk group alignment.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::str::FromStr;

/// Scale of the internal representation (nano-bytes per byte)
const SCALE: i128 = 1_000_000_000;

/// Upper bound on generated fractional digits when displaying
const MAX_DISPLAY_DIGITS: usize = 64;

// =============================================================================
// Unit
// =============================================================================

/// Size unit, binary multiples of 1024
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    B,
    K,
    M,
    G,
    T,
}

impl Unit {
    pub const ALL: [Unit; 5] = [Unit::B, Unit::K, Unit::M, Unit::G, Unit::T];

    /// Number of bytes in one unit
    pub fn bytes(self) -> i128 {
        match self {
            Unit::B => 1,
            Unit::K => 1 << 10,
            Unit::M => 1 << 20,
            Unit::G => 1 << 30,
            Unit::T => 1 << 40,
        }
    }

    /// Upper-case display letter
    pub fn letter(self) -> char {
        match self {
            Unit::B => 'B',
            Unit::K => 'K',
            Unit::M => 'M',
            Unit::G => 'G',
            Unit::T => 'T',
        }
    }

    /// Parse a unit letter, case-insensitive
    pub fn from_char(c: char) -> Option<Unit> {
        match c.to_ascii_lowercase() {
            'b' => Some(Unit::B),
            'k' => Some(Unit::K),
            'm' => Some(Unit::M),
            'g' => Some(Unit::G),
            't' => Some(Unit::T),
            _ => None,
        }
    }

    fn scaled(self) -> i128 {
        self.bytes() * SCALE
    }

    /// Unit picked for arithmetic results, so that values land in their
    /// natural unit (1536K stays K, 1048576K becomes 1G).
    fn for_magnitude(nanos: i128) -> Unit {
        let abs = nanos.abs();
        let kib = 1024_i128;
        if abs <= (kib - 1) * SCALE {
            Unit::B
        } else if abs <= (kib.pow(2) - kib) * SCALE {
            Unit::K
        } else if abs <= (kib.pow(3) - kib.pow(2)) * SCALE {
            Unit::M
        } else if abs <= (kib.pow(4) - kib.pow(3)) * SCALE {
            Unit::G
        } else {
            Unit::T
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

// =============================================================================
// Size
// =============================================================================

/// An exact storage size with a display unit
///
/// Equality, ordering and hashing look at the byte count only:
/// `Size("1m") == Size("1024k")`.
#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Size {
    nanos: i128,
    unit: Unit,
}

impl Size {
    /// Parse `<sign>?<digits>(.<digits>)?<unit>`, unit in `b|k|m|g|t`
    pub fn parse(text: &str) -> Result<Size> {
        let invalid = || Error::SizeFormat(format!("The size {} doesn't match format", text));

        let trimmed = text.trim();
        let (negative, rest) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let mut chars = rest.chars();
        let unit = chars
            .next_back()
            .and_then(Unit::from_char)
            .ok_or_else(invalid)?;
        let number = chars.as_str().trim_end();
        if number.is_empty() || !number.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
            return Err(invalid());
        }

        let magnitude = parse_decimal(text, number, unit.scaled())?;
        Ok(Size {
            nanos: if negative { -magnitude } else { magnitude },
            unit,
        })
    }

    /// Size of a whole number of units
    pub fn new(value: i64, unit: Unit) -> Size {
        Size {
            nanos: i128::from(value) * unit.scaled(),
            unit,
        }
    }

    /// Size of a number of bytes, displayed in bytes
    pub fn from_bytes(bytes: i128) -> Size {
        Size {
            nanos: bytes.saturating_mul(SCALE),
            unit: Unit::B,
        }
    }

    /// Same byte count, displayed in the unit matching its magnitude
    pub fn normalized(&self) -> Size {
        Size::from_nanos(self.nanos)
    }

    pub fn zero() -> Size {
        Size::from_bytes(0)
    }

    /// Display unit
    pub fn unit(&self) -> Unit {
        self.unit
    }

    /// Whole number of bytes (fractions of a byte are truncated)
    pub fn bytes(&self) -> i128 {
        self.nanos / SCALE
    }

    /// Whether the size is a whole number of bytes
    pub fn is_whole_bytes(&self) -> bool {
        self.nanos % SCALE == 0
    }

    /// Number of 512-byte blocks
    pub fn half_k_blocks(&self) -> i128 {
        self.bytes() / 512
    }

    /// Value expressed in `unit`, as a float for ratios and percentages
    pub fn number_in_unit(&self, unit: Unit) -> f64 {
        self.nanos as f64 / unit.scaled() as f64
    }

    /// Exact decimal value expressed in `unit`
    pub fn digits_in_unit(&self, unit: Unit) -> String {
        format_ratio(self.nanos, unit.scaled())
    }

    /// Exact decimal value in the display unit
    pub fn digits(&self) -> String {
        self.digits_in_unit(self.unit)
    }

    /// Same byte count, displayed in another unit
    pub fn convert_to_unit(&self, unit: Unit) -> Size {
        Size {
            nanos: self.nanos,
            unit,
        }
    }

    pub fn kilos(&self) -> Size {
        self.convert_to_unit(Unit::K)
    }

    pub fn megas(&self) -> Size {
        self.convert_to_unit(Unit::M)
    }

    pub fn gigas(&self) -> Size {
        self.convert_to_unit(Unit::G)
    }

    pub fn teras(&self) -> Size {
        self.convert_to_unit(Unit::T)
    }

    /// Value in `unit` rounded half-to-even to hundredths, as a count of
    /// hundredths
    fn hundredths_in(&self, unit: Unit) -> i128 {
        let den = unit.scaled();
        let num = self.nanos * 100;
        let quotient = num.div_euclid(den);
        let remainder = num.rem_euclid(den);
        match (remainder * 2).cmp(&den) {
            Ordering::Less => quotient,
            Ordering::Greater => quotient + 1,
            Ordering::Equal if quotient % 2 == 0 => quotient,
            Ordering::Equal => quotient + 1,
        }
    }

    fn from_nanos(nanos: i128) -> Size {
        Size {
            nanos,
            unit: Unit::for_magnitude(nanos),
        }
    }
}

impl FromStr for Size {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Size::parse(s)
    }
}

impl TryFrom<String> for Size {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Size::parse(&value)
    }
}

impl From<Size> for String {
    fn from(size: Size) -> Self {
        size.to_string()
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.digits(), self.unit.letter())
    }
}

impl fmt::Debug for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Size {}>", self)
    }
}

impl PartialEq for Size {
    fn eq(&self, other: &Self) -> bool {
        self.nanos == other.nanos
    }
}

impl Eq for Size {}

impl PartialOrd for Size {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Size {
    fn cmp(&self, other: &Self) -> Ordering {
        self.nanos.cmp(&other.nanos)
    }
}

impl Hash for Size {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.nanos.hash(state);
    }
}

impl Add for Size {
    type Output = Size;

    fn add(self, rhs: Size) -> Size {
        Size::from_nanos(self.nanos.saturating_add(rhs.nanos))
    }
}

impl Sub for Size {
    type Output = Size;

    fn sub(self, rhs: Size) -> Size {
        Size::from_nanos(self.nanos.saturating_sub(rhs.nanos))
    }
}

impl Neg for Size {
    type Output = Size;

    fn neg(self) -> Size {
        Size {
            nanos: -self.nanos,
            unit: self.unit,
        }
    }
}

impl Mul<i64> for Size {
    type Output = Size;

    fn mul(self, rhs: i64) -> Size {
        Size::from_nanos(self.nanos.saturating_mul(i128::from(rhs)))
    }
}

/// Division truncates below one nano-byte.
///
/// # Panics
///
/// Panics if `rhs` is zero, like integer division.
impl Div<i64> for Size {
    type Output = Size;

    fn div(self, rhs: i64) -> Size {
        Size::from_nanos(self.nanos / i128::from(rhs))
    }
}

/// Parse an unsigned decimal string and multiply it by `scale`
///
/// The fractional part is truncated below one unit of the result, so any
/// number of fractional digits is accepted.
fn parse_decimal(text: &str, number: &str, scale: i128) -> Result<i128> {
    let invalid = || Error::SizeFormat(format!("The size {} doesn't match format", text));
    let (int_part, frac_part) = match number.split_once('.') {
        Some((i, f)) => (i, f),
        None => (number, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid());
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit()) || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let overflow = || Error::SizeOverflow(format!("The size {} is too large", text));
    let mut whole: i128 = 0;
    for b in int_part.bytes() {
        whole = whole
            .checked_mul(10)
            .and_then(|w| w.checked_add(i128::from(b - b'0')))
            .ok_or_else(overflow)?;
    }
    let whole = whole.checked_mul(scale).ok_or_else(overflow)?;

    // floor(0.d1d2..dn * scale), folded from the last digit; stays below scale
    let fraction = frac_part
        .bytes()
        .rev()
        .fold(0_i128, |acc, b| (i128::from(b - b'0') * scale + acc) / 10);
    whole.checked_add(fraction).ok_or_else(overflow)
}

/// Exact decimal rendering of `num / den`; `den` is a product of powers of
/// two and five, so the expansion terminates.
fn format_ratio(num: i128, den: i128) -> String {
    let negative = num < 0;
    let num = num.abs();
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&(num / den).to_string());

    let mut remainder = num % den;
    if remainder != 0 {
        out.push('.');
        let mut produced = 0;
        while remainder != 0 && produced < MAX_DISPLAY_DIGITS {
            remainder *= 10;
            out.push(char::from(b'0' + (remainder / den) as u8));
            remainder %= den;
            produced += 1;
        }
    }
    out
}

// =============================================================================
// Aligned Size
// =============================================================================

/// Size of a volume held in 512-byte blocks with the appliance's display
/// string, compared with alignment awareness
///
/// When byte counts differ, the other side is rounded up to the next
/// multiple of the alignment; if that matches this size exactly, both are
/// considered equal. Appliances round allocations up this way, so asking for
/// `11005K` on an 8K-aligned disk group yields an `11008K` volume.
#[derive(Clone)]
pub struct AlignedSize {
    actual: Size,
    display: String,
    alignment: u64,
}

impl AlignedSize {
    /// Allocation block size in bytes
    pub const BLOCK_SIZE: u64 = 512;

    /// Volume of `blocks` 512-byte blocks shown as `display`
    pub fn from_blocks(blocks: u64, display: impl Into<String>) -> Self {
        let bytes = i128::from(blocks) * i128::from(Self::BLOCK_SIZE);
        Self {
            actual: Size::from_bytes(bytes),
            display: display.into(),
            alignment: Self::BLOCK_SIZE,
        }
    }

    /// Size known exactly; comparisons reduce to plain byte comparison
    pub fn exact(size: Size) -> Self {
        Self {
            actual: size,
            display: size.to_string(),
            alignment: 1,
        }
    }

    pub fn with_alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment.max(1);
        self
    }

    /// Real size of the volume
    pub fn actual(&self) -> Size {
        self.actual
    }

    /// Size string as displayed by the appliance
    pub fn display_size(&self) -> &str {
        &self.display
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    pub fn blocks(&self) -> i128 {
        self.actual.half_k_blocks()
    }

    /// Alignment-aware comparison of this size against `other`
    pub fn compare(&self, other: &Size) -> Ordering {
        let raw = self.actual.cmp(other);
        if raw == Ordering::Equal {
            return raw;
        }
        let alignment = i128::from(self.alignment) * SCALE;
        let rest = other.nanos.rem_euclid(alignment);
        let rounded = if rest != 0 {
            other.nanos + (alignment - rest)
        } else {
            other.nanos
        };
        if rounded == self.actual.nanos {
            Ordering::Equal
        } else {
            raw
        }
    }

    fn display_unit(&self) -> Option<Unit> {
        let trimmed = self.display.trim();
        let idx = trimmed.find(|c: char| !(c.is_ascii_digit() || c == '.'))?;
        trimmed[idx..].chars().next().and_then(Unit::from_char)
    }
}

impl fmt::Display for AlignedSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let (Some(unit), Ok(shown)) = (self.display_unit(), Size::parse(&self.display)) {
            let hundredths = self.actual.hundredths_in(unit);
            let quantized = Size {
                nanos: hundredths * unit.scaled() / 100,
                unit,
            };
            if quantized == shown {
                return write!(
                    f,
                    "{}.{:02}{}",
                    hundredths / 100,
                    (hundredths % 100).abs(),
                    unit.letter()
                );
            }
        }
        write!(
            f,
            "{} ~ {}={} (blocks of {} bytes)",
            self.display,
            self.actual.bytes(),
            self.blocks(),
            Self::BLOCK_SIZE
        )
    }
}

impl fmt::Debug for AlignedSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<AlignedSize {}>", self)
    }
}

impl PartialEq<Size> for AlignedSize {
    fn eq(&self, other: &Size) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl PartialOrd<Size> for AlignedSize {
    fn partial_cmp(&self, other: &Size) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

impl PartialEq for AlignedSize {
    fn eq(&self, other: &AlignedSize) -> bool {
        self.compare(&other.actual) == Ordering::Equal
    }
}

impl Serialize for AlignedSize {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(s: &str) -> Size {
        Size::parse(s).unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(size("1k").to_string(), "1K");
        assert_eq!(size("2.5t").to_string(), "2.5T");
        assert_eq!(size(" 10 M ").to_string(), "10M");
        assert_eq!(size("-10K").bytes(), -10240);
        assert_eq!(size("1.5M").bytes(), 1_572_864);
        assert_eq!(size(".5k").bytes(), 512);
        assert_eq!(size("3b").unit(), Unit::B);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "10", "10X", "M", "1.2.3M", "- 1M", "abcM", "1..M", ".M"] {
            assert!(
                matches!(Size::parse(bad), Err(Error::SizeFormat(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_long_fractions_truncate_below_a_nano_byte() {
        assert_eq!(size("1.000000000000000001T"), size("1T"));
        assert_eq!(size("0.123456789012345678t").bytes(), 135_742_175_046);
        assert_eq!(size("1.0000000000000000000000000000000001b"), size("1b"));
        assert_eq!(size("0.0000000009b"), size("0b"));
        assert_eq!(size("0.5000000000000000000000000001k").bytes(), 512);
    }

    #[test]
    fn test_parse_reports_overflow() {
        let huge = format!("{}T", "9".repeat(40));
        assert!(matches!(Size::parse(&huge), Err(Error::SizeOverflow(_))));
        assert!(matches!(Size::parse("1e3T"), Err(Error::SizeFormat(_))));
    }

    #[test]
    fn test_normalized_unit() {
        assert_eq!(Size::from_bytes(10_737_418_240).normalized().to_string(), "10G");
        assert_eq!(Size::from_bytes(3000).normalized().to_string(), "2.9296875K");
    }

    #[test]
    fn test_equality_compares_bytes() {
        assert_eq!(size("1m"), size("1024k"));
        assert_eq!(size("1024m"), size("1g"));
        assert_ne!(size("1g"), size("2g"));
        assert!(size("1g") < size("2g"));
        assert!(size("1t") > size("1023g"));
    }

    #[test]
    fn test_conversion_keeps_bytes() {
        for text in ["1.5M", "10.75M", "11008k", "3g", "-7b", "0.25t"] {
            let s = size(text);
            for unit in Unit::ALL {
                assert_eq!(s.convert_to_unit(unit).bytes(), s.bytes());
                assert_eq!(s.convert_to_unit(unit), s);
            }
        }
        assert_eq!(size("1023b").kilos().to_string(), "0.9990234375K");
        assert_eq!(size("1.5m").kilos().to_string(), "1536K");
    }

    #[test]
    fn test_arithmetic_picks_unit() {
        let diff = size("1m") - size("512k");
        assert_eq!(diff, size("0.5m"));
        assert_eq!(diff.unit(), Unit::K);

        let sum = size("1.5m") + size("512k");
        assert_eq!(sum, size("2m"));
        assert_eq!(sum.unit(), Unit::M);

        assert_eq!(size("1t") / 2, size("0.5t"));
        assert_eq!((size("1t") / 2).unit(), Unit::G);
        assert_eq!((size("1000b") + size("23b")).unit(), Unit::B);
        assert_eq!((size("1000b") + size("24b")).unit(), Unit::K);
        assert_eq!((size("512g") * 4).unit(), Unit::T);
        assert_eq!((-size("3k")).bytes(), -3072);
    }

    #[test]
    fn test_number_in_unit() {
        assert_eq!(size("20M").number_in_unit(Unit::M), 20.0);
        assert_eq!(size("512k").number_in_unit(Unit::M), 0.5);
        assert_eq!(size("10.75M").digits_in_unit(Unit::K), "11008");
        assert_eq!(size("1m").half_k_blocks(), 2048);
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&size("1.5M")).unwrap();
        assert_eq!(json, "\"1.5M\"");
        let back: Size = serde_json::from_str("\"1536k\"").unwrap();
        assert_eq!(back, size("1.5M"));
        assert!(serde_json::from_str::<Size>("\"huge\"").is_err());
    }

    #[test]
    fn test_aligned_display() {
        assert_eq!(AlignedSize::from_blocks(22016, "10.75M").to_string(), "10.75M");
        assert_eq!(AlignedSize::from_blocks(22016, "11008k").to_string(), "11008.00K");
        assert_eq!(
            AlignedSize::from_blocks(22010, "11008k").to_string(),
            "11008k ~ 11269120=22010 (blocks of 512 bytes)"
        );
    }

    #[test]
    fn test_aligned_comparison() {
        let fs_size = AlignedSize::from_blocks(22016, "10.75M");
        assert_ne!(size("10.75M"), size("11005k"));

        // default 512-byte alignment does not absorb a 3K difference
        assert!(fs_size != size("11005k"));
        assert!(fs_size > size("11005k"));

        let fs_size = fs_size.with_alignment(8192);
        assert!(fs_size == size("11005k"));
        assert!(fs_size == size("11008k"));
        assert!(fs_size > size("11000k"));
        assert!(fs_size < size("11009k"));
    }

    #[test]
    fn test_exact_aligned_size() {
        let exact = AlignedSize::exact(size("1025b"));
        assert!(exact == size("1025b"));
        assert!(exact != size("1024b"));
        assert_eq!(exact.display_size(), "1025B");
    }
}
