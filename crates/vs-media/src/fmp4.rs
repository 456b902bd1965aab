//! Fragmented MP4 fixups applied to segments before they are served.
//!
//! A session started mid-stream numbers its fragments from 1, but players
//! expect `moof/mfhd.sequence_number` to keep increasing across segments no
//! matter which session produced them.

use vs_core::{Error, Result};

const HEADER: usize = 8;

/// Rewrite `mfhd.sequence_number` of every `moof` in `data`, numbering them
/// consecutively from `first`. Returns how many fragments were patched.
pub fn patch_sequence_number(data: &mut [u8], first: u32) -> Result<usize> {
    let mut patched = 0usize;
    let mut next = first;

    for (start, end, kind) in boxes(data, 0, data.len())? {
        if &kind != b"moof" {
            continue;
        }
        for (child_start, child_end, child_kind) in boxes(data, start + HEADER, end)? {
            if &child_kind != b"mfhd" {
                continue;
            }
            // version(1) + flags(3) + sequence_number(4)
            let at = child_start + HEADER + 4;
            if at + 4 > child_end {
                return Err(Error::Internal("truncated mfhd box".into()));
            }
            data[at..at + 4].copy_from_slice(&next.to_be_bytes());
            next = next.wrapping_add(1);
            patched += 1;
            break;
        }
    }

    Ok(patched)
}

/// Read the sequence number of the first fragment, if any.
pub fn first_sequence_number(data: &[u8]) -> Result<Option<u32>> {
    for (start, end, kind) in boxes(data, 0, data.len())? {
        if &kind != b"moof" {
            continue;
        }
        for (child_start, child_end, child_kind) in boxes(data, start + HEADER, end)? {
            if &child_kind == b"mfhd" && child_start + HEADER + 8 <= child_end {
                let at = child_start + HEADER + 4;
                let bytes = [data[at], data[at + 1], data[at + 2], data[at + 3]];
                return Ok(Some(u32::from_be_bytes(bytes)));
            }
        }
    }
    Ok(None)
}

/// Enumerate `(start, end, type)` of the boxes laid out in `data[from..to]`.
fn boxes(data: &[u8], from: usize, to: usize) -> Result<Vec<(usize, usize, [u8; 4])>> {
    let mut out = Vec::new();
    let mut pos = from;
    while pos + HEADER <= to {
        let size32 = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
        let kind = [data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]];
        let size = match size32 {
            0 => to - pos,
            1 => {
                if pos + 16 > to {
                    return Err(Error::Internal("truncated largesize box header".into()));
                }
                let mut b = [0u8; 8];
                b.copy_from_slice(&data[pos + 8..pos + 16]);
                usize::try_from(u64::from_be_bytes(b))
                    .map_err(|_| Error::Internal("box too large".into()))?
            }
            n => n as usize,
        };
        if size < HEADER || pos + size > to {
            return Err(Error::Internal(format!(
                "malformed box '{}' at offset {pos}",
                String::from_utf8_lossy(&kind)
            )));
        }
        out.push((pos, pos + size, kind));
        pos += size;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mp4_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(payload);
        out
    }

    fn fragment(seq: u32) -> Vec<u8> {
        let mut mfhd_payload = vec![0, 0, 0, 0];
        mfhd_payload.extend_from_slice(&seq.to_be_bytes());
        let mut moof_payload = mp4_box(b"mfhd", &mfhd_payload);
        moof_payload.extend(mp4_box(b"traf", &[0u8; 16]));
        let mut out = mp4_box(b"moof", &moof_payload);
        out.extend(mp4_box(b"mdat", &[0xAB; 32]));
        out
    }

    #[test]
    fn patches_single_fragment() {
        let mut seg = mp4_box(b"styp", b"msdhmsix");
        seg.extend(fragment(1));
        let before_len = seg.len();

        assert_eq!(patch_sequence_number(&mut seg, 43).unwrap(), 1);
        assert_eq!(seg.len(), before_len);
        assert_eq!(first_sequence_number(&seg).unwrap(), Some(43));
    }

    #[test]
    fn numbers_multiple_fragments_consecutively() {
        let mut seg = fragment(1);
        seg.extend(fragment(2));
        assert_eq!(patch_sequence_number(&mut seg, 10).unwrap(), 2);

        let second = fragment(1).len();
        assert_eq!(first_sequence_number(&seg[second..]).unwrap(), Some(11));
    }

    #[test]
    fn init_segment_is_untouched() {
        let mut init = mp4_box(b"ftyp", b"iso5\0\0\0\x01");
        init.extend(mp4_box(b"moov", &[0u8; 24]));
        let copy = init.clone();
        assert_eq!(patch_sequence_number(&mut init, 5).unwrap(), 0);
        assert_eq!(init, copy);
    }

    #[test]
    fn truncated_box_is_error() {
        let mut seg = fragment(1);
        seg.truncate(seg.len() - 4);
        assert!(patch_sequence_number(&mut seg, 2).is_err());
    }
}
