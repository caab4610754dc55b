use std::path::Path;

use anyhow::Result;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct JwtSecretFile {
    secret: String,
}

/// Read the persisted signing secret, generating one on first start.
/// The file is written 0600 under the data dir.
pub fn get_or_create_jwt_secret(data_dir: &Path) -> Result<String> {
    let path = data_dir.join("jwt-secret.json");
    if path.exists() {
        let content = std::fs::read_to_string(&path)?;
        let file: JwtSecretFile = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
        if file.secret.len() < 32 {
            anyhow::bail!("JWT secret in {} is too short", path.display());
        }
        return Ok(file.secret);
    }

    let mut bytes = [0u8; 32];
    getrandom::fill(&mut bytes)
        .map_err(|e| anyhow::anyhow!("failed to generate random bytes: {e}"))?;
    let secret = URL_SAFE_NO_PAD.encode(bytes);

    let json = serde_json::to_string_pretty(&JwtSecretFile {
        secret: secret.clone(),
    })?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(&path, json)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(secret)
}
