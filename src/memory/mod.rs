pub mod activation;
pub mod decay;
pub mod episodes;
pub mod recall;
pub mod stats;
pub mod store;
pub mod types;

use chrono::{DateTime, SecondsFormat, Utc};

/// Encode an embedding as the little-endian f32 blob sqlite-vec reads.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Convert raw bytes back to an f32 embedding. Trailing partial chunks are ignored.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Fixed-width RFC 3339 (microseconds, `Z`) so stored timestamps compare
/// correctly as strings inside SQL.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_bytes_round_trip() {
        let v = vec![0.25f32, -1.0, 3.5];
        assert_eq!(bytes_to_embedding(&embedding_to_bytes(&v)), v);
    }

    #[test]
    fn embedding_blob_is_little_endian() {
        assert_eq!(embedding_to_bytes(&[1.0f32]), vec![0x00, 0x00, 0x80, 0x3f]);
        assert_eq!(
            embedding_to_bytes(&[1.0f32, -2.0]),
            [1.0f32.to_le_bytes(), (-2.0f32).to_le_bytes()].concat()
        );
    }

    #[test]
    fn timestamps_sort_lexicographically() {
        let a = Utc::now();
        let b = a + chrono::Duration::milliseconds(1500);
        let (sa, sb) = (format_timestamp(a), format_timestamp(b));
        assert!(sa < sb);
        assert_eq!(sa.len(), sb.len());
        assert!(parse_timestamp(&sa).is_some());
    }
}
