use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use ldk_server_client::client::LdkServerClient;
use ldk_server_protos::api::{Bolt11SendRequest, ListPaymentsRequest, OnchainReceiveRequest};
use ldk_server_protos::types::{PaymentDirection, PaymentStatus, payment_kind};

use crate::error::Error;
use crate::lightning::LightningClient;

const DEFAULT_PAYMENT_TIMEOUT: Duration = Duration::from_secs(60);

/// [`LightningClient`] backed by an ldk-server node over its REST API.
#[derive(Clone)]
pub struct LdkLightningClient {
    client: LdkServerClient,
    payment_timeout: Duration,
}

impl LdkLightningClient {
    pub fn new(rest_service_address: String) -> Self {
        Self {
            client: LdkServerClient::new(rest_service_address),
            payment_timeout: DEFAULT_PAYMENT_TIMEOUT,
        }
    }

    pub fn with_payment_timeout(mut self, payment_timeout: Duration) -> Self {
        self.payment_timeout = payment_timeout;
        self
    }

    pub async fn pay_invoice(&self, invoice: String) -> Result<String> {
        let resp = self
            .client
            .bolt11_send(Bolt11SendRequest {
                invoice,
                amount_msat: None,
                route_parameters: None,
            })
            .await
            .context("Bolt11Send")?;
        Ok(resp.payment_id)
    }

    pub async fn onchain_address(&self) -> Result<String> {
        let resp = self
            .client
            .onchain_receive(OnchainReceiveRequest {})
            .await
            .context("OnchainReceive")?;
        Ok(resp.address)
    }

    pub async fn wait_preimage(&self, payment_id: &str, timeout: Duration) -> Result<[u8; 32]> {
        let deadline = Instant::now() + timeout;
        loop {
            let payments = self
                .client
                .list_payments(ListPaymentsRequest { page_token: None })
                .await
                .context("ListPayments")?
                .payments;

            if let Some(p) = payments.into_iter().find(|p| p.id == payment_id)
                && p.direction == PaymentDirection::Outbound as i32
            {
                if p.status == PaymentStatus::Failed as i32 {
                    anyhow::bail!("payment failed: payment_id={payment_id}");
                }

                if p.status == PaymentStatus::Succeeded as i32 {
                    let preimage_hex = p
                        .kind
                        .and_then(|k| k.kind)
                        .and_then(|k| match k {
                            payment_kind::Kind::Bolt11(b) => b.preimage,
                            _ => None,
                        })
                        .context("missing payment preimage")?;

                    let bytes = hex::decode(preimage_hex).context("decode preimage hex")?;
                    let preimage: [u8; 32] = bytes
                        .try_into()
                        .map_err(|_| anyhow::anyhow!("preimage must be 32 bytes"))?;
                    return Ok(preimage);
                }
            }

            if Instant::now() >= deadline {
                anyhow::bail!("timeout waiting for preimage: payment_id={payment_id}");
            }

            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}

impl LightningClient for LdkLightningClient {
    async fn pay(&self, invoice: &str) -> crate::error::Result<[u8; 32]> {
        let payment_id = self
            .pay_invoice(invoice.to_string())
            .await
            .map_err(lightning_error)?;
        tracing::info!(%payment_id, "lightning payment sent");

        self.wait_preimage(&payment_id, self.payment_timeout)
            .await
            .map_err(lightning_error)
    }

    async fn create_address(&self) -> crate::error::Result<String> {
        self.onchain_address().await.map_err(lightning_error)
    }
}

fn lightning_error(err: anyhow::Error) -> Error {
    Error::Lightning(format!("{err:#}"))
}
