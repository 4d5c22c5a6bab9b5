use crate::error::{Result, SecurityError};
use crate::models::principal::PrincipalSet;

/// Converts a `PrincipalSet` to and from bytes.
pub trait PrincipalSerializer: Send + Sync {
    fn serialize(&self, principals: &PrincipalSet) -> Result<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> Result<PrincipalSet>;
}

/// The largest encoded `PrincipalSet` accepted for decoding (64 KiB).
pub const MAX_PRINCIPALS_BYTES: usize = 64 * 1024;

/// Bincode with the standard configuration.
///
/// Decoding is bounded by `MAX_PRINCIPALS_BYTES`, so declared lengths larger
/// than the input are rejected before anything is allocated.
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodePrincipalSerializer;

impl PrincipalSerializer for BincodePrincipalSerializer {
    fn serialize(&self, principals: &PrincipalSet) -> Result<Vec<u8>> {
        let config = bincode::config::standard();
        bincode::encode_to_vec(principals, config)
            .map_err(|e| SecurityError::Serialization(format!("Principal encoding failed: {}", e)))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<PrincipalSet> {
        if bytes.len() > MAX_PRINCIPALS_BYTES {
            return Err(SecurityError::Serialization(format!(
                "Encoded principals too large: {} bytes (max {})",
                bytes.len(),
                MAX_PRINCIPALS_BYTES
            )));
        }

        let config = bincode::config::standard().with_limit::<MAX_PRINCIPALS_BYTES>();
        let (principals, read) = bincode::decode_from_slice::<PrincipalSet, _>(bytes, config)
            .map_err(|e| SecurityError::Serialization(format!("Principal decoding failed: {}", e)))?;

        if read != bytes.len() {
            return Err(SecurityError::Serialization(format!(
                "Trailing bytes after principals: {} of {} consumed",
                read,
                bytes.len()
            )));
        }
        Ok(principals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_is_rejected() {
        let serializer = BincodePrincipalSerializer;
        assert!(serializer.deserialize(&[0xff, 0xff, 0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn oversized_length_prefix_is_rejected_without_allocating() {
        let serializer = BincodePrincipalSerializer;
        let mut bytes = vec![0xFD];
        bytes.extend_from_slice(&(1u64 << 40).to_le_bytes());
        assert!(matches!(
            serializer.deserialize(&bytes),
            Err(SecurityError::Serialization(_))
        ));
    }

    #[test]
    fn oversized_input_is_rejected() {
        let serializer = BincodePrincipalSerializer;
        let bytes = vec![0u8; MAX_PRINCIPALS_BYTES + 1];
        assert!(serializer.deserialize(&bytes).is_err());
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let serializer = BincodePrincipalSerializer;
        let mut bytes = serializer
            .serialize(&PrincipalSet::from_principal("jsmith", "ldap"))
            .unwrap();
        bytes.push(0);
        assert!(serializer.deserialize(&bytes).is_err());
    }
}
