use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::units::GatewayUnits;
use super::{
    parse_gateway_status, AccountResolution, ChargeInit, ChargeRequest, DepositAccount,
    DepositAccountRequest, GatewayError, PaymentGateway, StatusReport, TransferAck,
    TransferRequest,
};

#[derive(Debug, Clone)]
pub struct GatewayClientConfig {
    pub base_url: String,
    pub secret_key: String,
    pub timeout: Duration,
    pub units: GatewayUnits,
    /// Total attempts for verification calls.
    pub read_attempts: u32,
    pub retry_base: Duration,
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl GatewayClientConfig {
    pub fn new(base_url: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            secret_key: secret_key.into(),
            timeout: Duration::from_secs(30),
            units: GatewayUnits::default(),
            read_attempts: 3,
            retry_base: Duration::from_millis(200),
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct DepositAccountData {
    account_number: String,
    account_name: String,
    bank_name: String,
    #[serde(default)]
    id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChargeInitData {
    authorization_url: String,
    #[serde(default)]
    access_code: Option<String>,
    #[serde(default)]
    id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct TransferData {
    status: String,
    #[serde(default)]
    id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    #[serde(default)]
    reference: Option<String>,
    status: String,
    #[serde(default)]
    amount: Option<Value>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    sender_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResolveData {
    account_name: String,
}

/// HTTP client for the payment gateway REST API.
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    base_url: String,
    secret_key: String,
    units: GatewayUnits,
    read_attempts: u32,
    retry_base: Duration,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl GatewayClient {
    pub fn new(config: GatewayClientConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::rejected("client_build", e.to_string()))?;

        let backoff = backoff::equal_jittered(config.reset_timeout, config.reset_timeout * 2);
        let policy = failure_policy::consecutive_failures(config.failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        Ok(GatewayClient {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key,
            units: config.units,
            read_attempts: config.read_attempts.max(1),
            retry_base: config.retry_base,
            circuit_breaker,
        })
    }

    /// Returns the current state of the circuit breaker
    pub fn circuit_state(&self) -> &'static str {
        if self.circuit_breaker.is_call_permitted() {
            "closed"
        } else {
            "open"
        }
    }

    pub fn units(&self) -> GatewayUnits {
        self.units
    }

    /// One HTTP exchange through the circuit breaker. Only transient failures trip it.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(&self.secret_key);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let result = self
            .circuit_breaker
            .call_with(
                |err: &GatewayError| err.is_transient(),
                async move {
                    let response = request.send().await.map_err(transport_error)?;
                    decode(response).await
                },
            )
            .await;

        match result {
            Ok(data) => Ok(data),
            Err(FailsafeError::Rejected) => Err(GatewayError::circuit_open()),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }

    /// Idempotent reads retry transient failures with exponential backoff.
    async fn read(&self, path: &str) -> Result<Value, GatewayError> {
        let mut attempt = 0;
        loop {
            match self.execute(Method::GET, path, None).await {
                Err(err)
                    if err.is_transient()
                        && err.code != "circuit_open"
                        && attempt + 1 < self.read_attempts =>
                {
                    let delay = self.retry_base * 2u32.pow(attempt);
                    tracing::warn!(
                        path,
                        attempt = attempt + 1,
                        code = %err.code,
                        "gateway read failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn verify_report(
        &self,
        reference: &str,
        data: Value,
        unit: super::units::AmountUnit,
    ) -> Result<StatusReport, GatewayError> {
        let data: VerifyData = parse_data(data)?;
        let amount = data
            .amount
            .as_ref()
            .filter(|v| !v.is_null())
            .map(|v| unit.from_gateway(v))
            .transpose()
            .map_err(|e| GatewayError::rejected("invalid_amount", e.to_string()))?;
        Ok(StatusReport {
            reference: data.reference.unwrap_or_else(|| reference.to_string()),
            status: parse_gateway_status(&data.status),
            amount,
            gateway_ref: data.id.as_ref().map(id_string),
            sender_name: data.sender_name,
        })
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::transient("timeout", err.to_string())
    } else {
        GatewayError::transient("network", err.to_string())
    }
}

async fn decode(response: reqwest::Response) -> Result<Value, GatewayError> {
    let status = response.status();
    let envelope = response.json::<Envelope>().await.ok();

    if status.is_success() {
        let envelope = envelope.ok_or_else(|| {
            GatewayError::transient("invalid_response", "gateway response was not an envelope")
                .with_status(status.as_u16())
        })?;
        if !envelope.status {
            return Err(GatewayError::rejected(
                envelope.code.unwrap_or_else(|| "declined".to_string()),
                envelope.message,
            )
            .with_status(status.as_u16()));
        }
        return Ok(envelope.data.unwrap_or(Value::Null));
    }

    let (code, message) = match envelope {
        Some(envelope) => (envelope.code, envelope.message),
        None => (None, status.to_string()),
    };
    let err = if status == StatusCode::NOT_FOUND {
        GatewayError::not_found(message)
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        GatewayError::transient(code.unwrap_or_else(|| "unavailable".to_string()), message)
    } else {
        GatewayError::rejected(code.unwrap_or_else(|| "rejected".to_string()), message)
    };
    Err(err.with_status(status.as_u16()))
}

fn parse_data<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, GatewayError> {
    serde_json::from_value(data).map_err(|e| GatewayError::rejected("invalid_response", e.to_string()))
}

fn id_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait::async_trait]
impl PaymentGateway for GatewayClient {
    async fn create_deposit_account(
        &self,
        request: &DepositAccountRequest,
    ) -> Result<DepositAccount, GatewayError> {
        let body = json!({
            "reference": request.reference,
            "customer_id": request.user_id,
            "customer_name": request.customer_name,
            "amount": self.units.deposit.to_gateway(request.amount),
            "expires_at": request.expires_at.to_rfc3339(),
        });
        let data: DepositAccountData =
            parse_data(self.execute(Method::POST, "/virtual-accounts", Some(body)).await?)?;
        Ok(DepositAccount {
            account_number: data.account_number,
            account_name: data.account_name,
            bank_name: data.bank_name,
            gateway_ref: data.id.as_ref().map(id_string),
        })
    }

    async fn initialize_charge(&self, request: &ChargeRequest) -> Result<ChargeInit, GatewayError> {
        let body = json!({
            "reference": request.reference,
            "email": request.email,
            "amount": self.units.charge.to_gateway(request.amount),
            "callback_url": request.callback_url,
        });
        let data: ChargeInitData =
            parse_data(self.execute(Method::POST, "/charges/initialize", Some(body)).await?)?;
        Ok(ChargeInit {
            authorization_url: data.authorization_url,
            access_code: data.access_code,
            gateway_ref: data.id.as_ref().map(id_string),
        })
    }

    async fn transfer(&self, request: &TransferRequest) -> Result<TransferAck, GatewayError> {
        let body = json!({
            "reference": request.reference,
            "amount": self.units.transfer.to_gateway(request.amount),
            "account_number": request.beneficiary.account_number,
            "bank_code": request.beneficiary.bank_code,
            "account_name": request.beneficiary.account_name,
            "narration": request.narration,
        });
        let data: TransferData =
            parse_data(self.execute(Method::POST, "/transfers", Some(body)).await?)?;
        Ok(TransferAck {
            status: parse_gateway_status(&data.status),
            gateway_ref: data.id.as_ref().map(id_string),
        })
    }

    async fn verify_deposit(&self, reference: &str) -> Result<StatusReport, GatewayError> {
        let data = self
            .read(&format!("/virtual-accounts/{}/verify", reference))
            .await?;
        self.verify_report(reference, data, self.units.deposit)
    }

    async fn verify_charge(&self, reference: &str) -> Result<StatusReport, GatewayError> {
        let data = self.read(&format!("/charges/{}/verify", reference)).await?;
        self.verify_report(reference, data, self.units.charge)
    }

    async fn verify_transfer(&self, reference: &str) -> Result<StatusReport, GatewayError> {
        let data = self.read(&format!("/transfers/{}/verify", reference)).await?;
        self.verify_report(reference, data, self.units.transfer)
    }

    async fn resolve_account(
        &self,
        account_number: &str,
        bank_code: &str,
    ) -> Result<AccountResolution, GatewayError> {
        let path = format!(
            "/banks/resolve?account_number={}&bank_code={}",
            account_number, bank_code
        );
        match self.read(&path).await {
            Ok(data) => {
                let data: ResolveData = parse_data(data)?;
                Ok(AccountResolution::Resolved {
                    account_name: data.account_name,
                })
            }
            Err(err) if err.code == "unsupported_bank" => Ok(AccountResolution::UnsupportedBank),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_client_creation() {
        let client =
            GatewayClient::new(GatewayClientConfig::new("https://gateway.test/", "sk_test"))
                .unwrap();
        assert_eq!(client.base_url, "https://gateway.test");
        assert_eq!(client.circuit_state(), "closed");
    }

    #[test]
    fn numeric_ids_are_stringified() {
        assert_eq!(id_string(&json!(12345)), "12345");
        assert_eq!(id_string(&json!("TRF_9")), "TRF_9");
    }
}
