//! Trading keypair loading

use solana_sdk::signature::Keypair;
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};

/// Environment variable holding a base58 secret key
pub const PRIVATE_KEY_ENV: &str = "SNIPER_PRIVATE_KEY";

/// Load the signer from a JSON keypair file, or from `SNIPER_PRIVATE_KEY`
pub fn load_keypair(path: Option<&str>) -> Result<Keypair> {
    match path {
        Some(path) => load_keypair_file(Path::new(path)),
        None => {
            let encoded = std::env::var(PRIVATE_KEY_ENV)
                .map_err(|_| Error::MissingEnvVar(PRIVATE_KEY_ENV.to_string()))?;
            keypair_from_base58(encoded.trim())
        }
    }
}

/// Load a Solana CLI style keypair file (JSON byte array)
pub fn load_keypair_file(path: &Path) -> Result<Keypair> {
    debug!("Loading keypair from: {:?}", path);

    // Refuse world/group readable key files on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(path) {
            let mode = metadata.permissions().mode();
            if mode & 0o077 != 0 {
                return Err(Error::InvalidKeypair(format!(
                    "{} has insecure permissions {:o}. Run 'chmod 600 {}'",
                    path.display(),
                    mode & 0o777,
                    path.display()
                )));
            }
        }
    }

    let data = std::fs::read(path)
        .map_err(|e| Error::InvalidKeypair(format!("Failed to read {}: {}", path.display(), e)))?;
    let bytes: Vec<u8> = serde_json::from_slice(&data)
        .map_err(|e| Error::InvalidKeypair(format!("Failed to parse {}: {}", path.display(), e)))?;
    Keypair::from_bytes(&bytes)
        .map_err(|e| Error::InvalidKeypair(format!("Invalid keypair bytes: {}", e)))
}

/// Decode a base58 64-byte secret key
pub fn keypair_from_base58(encoded: &str) -> Result<Keypair> {
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| Error::InvalidKeypair(format!("Invalid base58: {}", e)))?;
    Keypair::from_bytes(&bytes)
        .map_err(|e| Error::InvalidKeypair(format!("Invalid keypair bytes: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::signature::Signer;

    #[test]
    fn test_base58_round_trip() {
        let keypair = Keypair::new();
        let encoded = bs58::encode(keypair.to_bytes()).into_string();
        let loaded = keypair_from_base58(&encoded).unwrap();
        assert_eq!(loaded.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_invalid_base58() {
        assert!(matches!(
            keypair_from_base58("not-base58-0OIl"),
            Err(Error::InvalidKeypair(_))
        ));
    }

    #[test]
    fn test_load_file() {
        let keypair = Keypair::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id.json");
        std::fs::write(&path, serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap())
            .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        }

        let loaded = load_keypair_file(&path).unwrap();
        assert_eq!(loaded.pubkey(), keypair.pubkey());
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_open_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let keypair = Keypair::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id.json");
        std::fs::write(&path, serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap())
            .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(load_keypair_file(&path).is_err());
    }
}
