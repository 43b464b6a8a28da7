//! Wire formats for the digest.
//!
//! Two encodings share a leading big-endian `i32` tag. The verbose format
//! (tag 1) lays out the compression, the centroid count, full `f64` means,
//! then `i32` counts. The compact format (tag 2) delta-encodes the means as
//! `f32` and writes the counts as unsigned base-128 varints: seven bits per
//! byte, continuation bit `0x80`, little-endian within the number. Five
//! payload bytes is the ceiling on both sides of the wire, so counts of
//! 2^35 and up cannot travel in the compact format.
//!
//! Decoding replays the stored centroids through the update rule, which
//! means a decoded digest is a statistically equivalent sketch rather than
//! a bitwise copy of the one encoded.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Error;

use super::TreeDigest;

/// Tag for the self-describing `f64`/`i32` layout.
pub const VERBOSE_ENCODING: i32 = 1;

/// Tag for the delta/varint layout.
pub const SMALL_ENCODING: i32 = 2;

impl TreeDigest {
    /// Upper bound on the bytes [`to_bytes`](TreeDigest::to_bytes) writes.
    pub fn byte_size(&self) -> usize {
        4 + 8 + 4 + 12 * self.centroid_count()
    }

    /// Exact size of the compact encoding, measured by writing it out.
    ///
    /// Fails the way [`to_small_bytes`](TreeDigest::to_small_bytes) fails.
    pub fn small_byte_size(&self) -> Result<usize, Error> {
        let mut scratch = Vec::with_capacity(self.byte_size());
        self.to_small_bytes(&mut scratch)?;
        Ok(scratch.len())
    }

    /// Write the verbose encoding into `buf`.
    ///
    /// Fails with [`Error::Overflow`] if a count does not fit the wire's
    /// `i32` field.
    pub fn to_bytes<W: Write>(&self, buf: &mut W) -> Result<(), Error> {
        buf.write_i32::<BigEndian>(VERBOSE_ENCODING)?;
        buf.write_f64::<BigEndian>(self.compression())?;
        let declared = i32::try_from(self.centroid_count()).map_err(|_| Error::Overflow)?;
        buf.write_i32::<BigEndian>(declared)?;
        for centroid in self.centroids() {
            buf.write_f64::<BigEndian>(centroid.mean())?;
        }
        for centroid in self.centroids() {
            let count = i32::try_from(centroid.count()).map_err(|_| Error::Overflow)?;
            buf.write_i32::<BigEndian>(count)?;
        }
        Ok(())
    }

    /// Write the compact encoding into `buf`.
    ///
    /// Fails with [`Error::Overflow`] if a count needs more than five varint
    /// payload bytes.
    pub fn to_small_bytes<W: Write>(&self, buf: &mut W) -> Result<(), Error> {
        buf.write_i32::<BigEndian>(SMALL_ENCODING)?;
        buf.write_f64::<BigEndian>(self.compression())?;
        let declared = i32::try_from(self.centroid_count()).map_err(|_| Error::Overflow)?;
        buf.write_i32::<BigEndian>(declared)?;
        let mut previous = 0.0;
        for centroid in self.centroids() {
            let delta = centroid.mean() - previous;
            previous = centroid.mean();
            buf.write_f32::<BigEndian>(delta as f32)?;
        }
        for centroid in self.centroids() {
            encode_varint(buf, centroid.count())?;
        }
        Ok(())
    }

    /// Reconstruct a digest from either encoding.
    ///
    /// The stored centroids are replayed through the update rule in file
    /// order. Unknown tags fail with [`Error::UnknownFormat`]; a buffer
    /// that runs out early fails with [`Error::Truncated`].
    pub fn from_bytes<R: Read>(buf: &mut R) -> Result<TreeDigest, Error> {
        let tag = buf.read_i32::<BigEndian>()?;
        if tag != VERBOSE_ENCODING && tag != SMALL_ENCODING {
            return Err(Error::UnknownFormat(tag));
        }
        let compression = buf.read_f64::<BigEndian>()?;
        let mut digest = TreeDigest::new(compression)?;
        let declared = buf.read_i32::<BigEndian>()?;
        let n = usize::try_from(declared)
            .map_err(|_| Error::InvalidInput("centroid count must not be negative"))?;

        let mut means = Vec::new();
        if tag == VERBOSE_ENCODING {
            for _ in 0..n {
                means.push(buf.read_f64::<BigEndian>()?);
            }
        } else {
            let mut mean = 0.0;
            for _ in 0..n {
                mean += f64::from(buf.read_f32::<BigEndian>()?);
                means.push(mean);
            }
        }

        for mean in means {
            let count = if tag == VERBOSE_ENCODING {
                u64::try_from(buf.read_i32::<BigEndian>()?)
                    .map_err(|_| Error::InvalidInput("count must be positive"))?
            } else {
                decode_varint(buf)?
            };
            digest.add(mean, count)?;
        }
        Ok(digest)
    }
}

/// Base-128 encode `n`, low bits first, continuation bit `0x80`.
pub(crate) fn encode_varint<W: Write>(buf: &mut W, mut n: u64) -> Result<(), Error> {
    let mut continuations = 0;
    while n > 0x7f {
        if continuations == 4 {
            return Err(Error::Overflow);
        }
        buf.write_u8(0x80 | (n & 0x7f) as u8)?;
        n >>= 7;
        continuations += 1;
    }
    buf.write_u8(n as u8)?;
    Ok(())
}

/// Decode a varint written by [`encode_varint`]. The shift ceiling of 28
/// bounds a well-formed number to five bytes; anything longer is a corrupt
/// stream.
pub(crate) fn decode_varint<R: Read>(buf: &mut R) -> Result<u64, Error> {
    let mut byte = buf.read_u8()?;
    let mut value = u64::from(byte & 0x7f);
    let mut shift = 7;
    while byte & 0x80 != 0 {
        if shift > 28 {
            return Err(Error::Overflow);
        }
        byte = buf.read_u8()?;
        value += u64::from(byte & 0x7f) << shift;
        shift += 7;
    }
    Ok(value)
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck::QuickCheck;

    #[test]
    fn varint_round_trips_below_the_ceiling() {
        fn inner(n: u64) -> bool {
            let n = n & 0x7_ffff_ffff; // keep it under 2^35
            let mut buf = Vec::new();
            encode_varint(&mut buf, n).unwrap();
            assert!(buf.len() <= 5);
            decode_varint(&mut &buf[..]).unwrap() == n
        }
        QuickCheck::new().quickcheck(inner as fn(u64) -> bool);
    }

    #[test]
    fn varint_boundaries() {
        for &(n, bytes) in &[
            (0u64, 1usize),
            (0x7f, 1),
            (0x80, 2),
            (1 << 14, 3),
            (1 << 21, 4),
            (1 << 28, 5),
            ((1 << 35) - 1, 5),
        ] {
            let mut buf = Vec::new();
            encode_varint(&mut buf, n).unwrap();
            assert_eq!(buf.len(), bytes, "width of {}", n);
            assert_eq!(decode_varint(&mut &buf[..]).unwrap(), n);
        }
    }

    #[test]
    fn varint_rejects_wide_counts() {
        let mut buf = Vec::new();
        assert_eq!(encode_varint(&mut buf, 1 << 35), Err(Error::Overflow));
        assert_eq!(encode_varint(&mut buf, u64::MAX), Err(Error::Overflow));
    }

    #[test]
    fn varint_rejects_runaway_streams() {
        let corrupt = [0x80u8, 0x80, 0x80, 0x80, 0x80, 0x01];
        assert_eq!(decode_varint(&mut &corrupt[..]), Err(Error::Overflow));

        let starved = [0x80u8, 0x80];
        assert_eq!(decode_varint(&mut &starved[..]), Err(Error::Truncated));
    }

    #[test]
    fn verbose_layout_is_exactly_the_bound() {
        let mut digest = TreeDigest::with_seed(100.0, 3).unwrap();
        for i in 0..100 {
            digest.add(f64::from(i), 1).unwrap();
        }

        let mut buf = Vec::new();
        digest.to_bytes(&mut buf).unwrap();
        assert_eq!(buf.len(), digest.byte_size());
        assert_eq!(&buf[..4], &[0, 0, 0, 1]);
    }

    #[test]
    fn compact_layout_reports_its_own_size() {
        let mut digest = TreeDigest::with_seed(100.0, 5).unwrap();
        for i in 0..1_000 {
            digest.add(f64::from(i), 1).unwrap();
        }

        let mut buf = Vec::new();
        digest.to_small_bytes(&mut buf).unwrap();
        assert_eq!(buf.len(), digest.small_byte_size().unwrap());
        assert_eq!(&buf[..4], &[0, 0, 0, 2]);
        assert!(buf.len() < digest.byte_size());
    }

    #[test]
    fn unknown_tags_are_rejected() {
        let mut buf = Vec::new();
        buf.write_i32::<BigEndian>(3).unwrap();
        buf.write_f64::<BigEndian>(100.0).unwrap();
        assert_eq!(
            TreeDigest::from_bytes(&mut &buf[..]).map(|_| ()),
            Err(Error::UnknownFormat(3))
        );
    }

    #[test]
    fn truncated_streams_are_rejected() {
        let mut digest = TreeDigest::with_seed(100.0, 7).unwrap();
        for i in 0..50 {
            digest.add(f64::from(i), 1).unwrap();
        }

        let mut buf = Vec::new();
        digest.to_bytes(&mut buf).unwrap();
        for cut in [0, 3, 4, 12, buf.len() / 2, buf.len() - 1] {
            let mut short = &buf[..cut];
            assert_eq!(
                TreeDigest::from_bytes(&mut short).map(|_| ()),
                Err(Error::Truncated),
                "cut at {}",
                cut
            );
        }
    }

    #[test]
    fn decoding_validates_replayed_centroids() {
        // tag, compression, one centroid with a zero count
        let mut buf = Vec::new();
        buf.write_i32::<BigEndian>(VERBOSE_ENCODING).unwrap();
        buf.write_f64::<BigEndian>(100.0).unwrap();
        buf.write_i32::<BigEndian>(1).unwrap();
        buf.write_f64::<BigEndian>(1.0).unwrap();
        buf.write_i32::<BigEndian>(0).unwrap();
        assert!(TreeDigest::from_bytes(&mut &buf[..]).is_err());
    }
}
