//! Annex B byte-stream parsing.

use bytes::Bytes;

use crate::error::RtpError;

/// Split an Annex B byte stream into its NAL units.
///
/// The stream must open with a start code (three or four byte form). The
/// returned slices share the input buffer and carry neither start codes nor
/// the zero padding between units.
pub fn split_nal_units(data: &Bytes) -> Result<Vec<Bytes>, RtpError> {
    let mut pos = match next_start_code(data, 0) {
        Some(sc) if data[..sc].iter().all(|&b| b == 0) => sc + 3,
        _ => return Err(RtpError::InvalidValue),
    };

    let mut units = Vec::new();

    loop {
        match next_start_code(data, pos) {
            Some(sc) => {
                // zeros in front of the next start code are padding (the
                // fourth octet of a four byte start code included)
                let mut end = sc;

                while end > pos && data[end - 1] == 0 {
                    end -= 1;
                }

                if end > pos {
                    units.push(data.slice(pos..end));
                }

                pos = sc + 3;
            }
            None => {
                if pos < data.len() {
                    units.push(data.slice(pos..));
                }

                break;
            }
        }
    }

    Ok(units)
}

/// Find the next three byte start code at or after a given offset.
fn next_start_code(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(3)
        .position(|window| window == [0, 0, 1])
        .map(|pos| from + pos)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::split_nal_units;

    #[test]
    fn test_split_stream() {
        let data = Bytes::from_static(&[
            0, 0, 0, 1, 0x67, 0xaa, // SPS with a four byte start code
            0, 0, 1, 0x68, 0xbb, // PPS with a three byte start code
            0, 0, 1, 0x65, 1, 2, 3,
        ]);

        let units = split_nal_units(&data).unwrap();

        assert_eq!(units.len(), 3);
        assert_eq!(units[0].as_ref(), &[0x67, 0xaa]);
        assert_eq!(units[1].as_ref(), &[0x68, 0xbb]);
        assert_eq!(units[2].as_ref(), &[0x65, 1, 2, 3]);
    }

    #[test]
    fn test_missing_start_code() {
        assert!(split_nal_units(&Bytes::from_static(&[0xff, 0, 0, 1])).is_err());
        assert!(split_nal_units(&Bytes::from_static(&[])).is_err());
    }

    #[test]
    fn test_empty_units_skipped() {
        // adjacent start codes produce no empty unit
        let data = Bytes::from_static(&[0, 0, 1, 0, 0, 1, 0x41, 0x9a]);

        let units = split_nal_units(&data).unwrap();

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].as_ref(), &[0x41, 0x9a]);
    }
}
