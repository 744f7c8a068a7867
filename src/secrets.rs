use std::collections::HashMap;
use std::env;

use anyhow::{Context, Result};
use vaultrs::auth::approle;
use vaultrs::client::{Client, VaultClient, VaultClientSettingsBuilder};
use vaultrs::kv2;

/// Vault keys and the configuration variables they stand in for.
const SECRET_KEYS: &[(&str, &str)] = &[
    ("webhook_secret", "WEBHOOK_SECRET"),
    ("gateway_secret_key", "GATEWAY_SECRET_KEY"),
    ("database_url", "DATABASE_URL"),
    ("entitlement_secret", "ENTITLEMENT_SECRET"),
    ("admin_api_key", "ADMIN_API_KEY"),
];

pub struct SecretsManager {
    client: VaultClient,
    kv_mount: String,
    secret_path: String,
}

impl SecretsManager {
    /// Vault is only consulted when an AppRole is configured.
    pub fn is_configured() -> bool {
        env::var("VAULT_ROLE_ID").is_ok_and(|v| !v.is_empty())
    }

    pub async fn new() -> Result<Self> {
        let vault_addr =
            env::var("VAULT_ADDR").unwrap_or_else(|_| "http://127.0.0.1:8200".to_string());
        let role_id = env::var("VAULT_ROLE_ID").context("VAULT_ROLE_ID is required")?;
        let secret_id = env::var("VAULT_SECRET_ID").context("VAULT_SECRET_ID is required")?;
        let auth_mount = env::var("VAULT_AUTH_MOUNT").unwrap_or_else(|_| "auth/approle".to_string());
        let kv_mount = env::var("VAULT_KV_MOUNT").unwrap_or_else(|_| "secret".to_string());
        let secret_path =
            env::var("VAULT_SECRET_PATH").unwrap_or_else(|_| "settlement-core".to_string());

        let mut client = VaultClient::new(
            VaultClientSettingsBuilder::default()
                .address(&vault_addr)
                .build()
                .context("failed to build Vault client settings")?,
        )
        .context("failed to create Vault client")?;

        let auth = approle::login(&mut client, &auth_mount, &role_id, &secret_id)
            .await
            .context("failed to authenticate to Vault with AppRole")?;
        client.set_token(&auth.client_token);

        Ok(Self {
            client,
            kv_mount,
            secret_path,
        })
    }

    /// Configuration values held in Vault, keyed by their environment variable name.
    pub async fn config_overrides(&self) -> Result<HashMap<String, String>> {
        let secret: HashMap<String, String> =
            kv2::read(&self.client, &self.kv_mount, &self.secret_path)
                .await
                .with_context(|| {
                    format!(
                        "failed to read {}/{} from Vault",
                        self.kv_mount, self.secret_path
                    )
                })?;
        Ok(overrides_from(&secret))
    }
}

fn overrides_from(secret: &HashMap<String, String>) -> HashMap<String, String> {
    SECRET_KEYS
        .iter()
        .filter_map(|(vault_key, env_key)| {
            secret
                .get(*vault_key)
                .filter(|value| !value.is_empty())
                .map(|value| (env_key.to_string(), value.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_keys_only() {
        let secret = HashMap::from([
            ("webhook_secret".to_string(), "whsec".to_string()),
            ("gateway_secret_key".to_string(), String::new()),
            ("unrelated".to_string(), "x".to_string()),
        ]);
        let overrides = overrides_from(&secret);
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides["WEBHOOK_SECRET"], "whsec");
    }
}
