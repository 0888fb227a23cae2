use std::str::FromStr as _;
use std::time::Duration;

use bitcoin::hashes::Hash as _;
use bitcoin::secp256k1::PublicKey;
use lightning_invoice::{Bolt11Invoice, Bolt11InvoiceDescriptionRef, Currency};

use crate::chain::network::ChainNetwork;
use crate::error::{Error, Result};

/// The fields of a BOLT11 invoice a swap is priced and locked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInvoice {
    pub network: ChainNetwork,
    /// Whole tokens, rounded down. `None` for amountless invoices.
    pub tokens: Option<u64>,
    pub mtokens: Option<u64>,
    pub payment_hash: [u8; 32],
    pub destination_public_key: PublicKey,
    /// Since the unix epoch.
    pub expires_at: Option<Duration>,
    /// Absent when the invoice commits to a description hash instead.
    pub description: Option<String>,
}

pub fn parse_invoice(invoice: &str) -> Result<ParsedInvoice> {
    let invoice = Bolt11Invoice::from_str(invoice.trim())
        .map_err(|e| Error::invalid_input("invoice", format!("parse BOLT11 invoice: {e}")))?;

    let network = network_for_currency(invoice.currency())?;
    let mtokens = invoice.amount_milli_satoshis();
    let destination_public_key = invoice
        .payee_pub_key()
        .copied()
        .unwrap_or_else(|| invoice.recover_payee_pub_key());
    let description = match invoice.description() {
        Bolt11InvoiceDescriptionRef::Direct(description) => Some(description.to_string()),
        Bolt11InvoiceDescriptionRef::Hash(_) => None,
    };

    Ok(ParsedInvoice {
        network,
        tokens: mtokens.map(|msat| msat / 1_000),
        mtokens,
        payment_hash: invoice.payment_hash().to_byte_array(),
        destination_public_key,
        expires_at: invoice.expires_at(),
        description,
    })
}

fn network_for_currency(currency: Currency) -> Result<ChainNetwork> {
    match currency {
        Currency::Bitcoin => Ok(ChainNetwork::Bitcoin),
        Currency::BitcoinTestnet => Ok(ChainNetwork::Testnet),
        Currency::Regtest => Ok(ChainNetwork::Regtest),
        other => Err(Error::UnknownNetwork(format!("{other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COFFEE: &str = "lnbc2500u1pvjluezsp5zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zygspp5qqqsyqcyq5rqwzqfqqqsyqcyq5rqwzqfqqqsyqcyq5rqwzqfqypqdq5xysxxatsyp3k7enxv4jsxqzpu9qrsgquk0rl77nj30yxdy8j9vdx85fkpmdla2087ne0xh8nhedh8w27kyke0lp53ut353s06fv3qfegext0eh0ymjpf39tuven09sam30g4vgpfna3rh";
    const TESTNET_HASHED: &str = "lntb20m1pvjluezsp5zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zygshp58yjmdan79s6qqdhdzgynm4zwqd5d7xmw5fk98klysy043l2ahrqspp5qqqsyqcyq5rqwzqfqqqsyqcyq5rqwzqfqqqsyqcyq5rqwzqfqypqfpp3x9et2e20v6pu37c5d9vax37wxq72un989qrsgqdj545axuxtnfemtpwkc45hx9d2ft7x04mt8q7y6t0k2dge9e7h8kpy9p34ytyslj3yu569aalz2xdk8xkd7ltxqld94u8h2esmsmacgpghe9k8";

    #[test]
    fn parses_direct_description_invoice() {
        let parsed = parse_invoice(COFFEE).unwrap();
        assert_eq!(parsed.network, ChainNetwork::Bitcoin);
        assert_eq!(parsed.tokens, Some(250_000));
        assert_eq!(
            hex::encode(parsed.payment_hash),
            "0001020304050607080900010203040506070809000102030405060708090102"
        );
        assert_eq!(
            parsed.destination_public_key.to_string(),
            "03e7156ae33b0a208d0744199163177e909e80176e55d97a2f221ede0f934dd9ad"
        );
        assert_eq!(parsed.expires_at, Some(Duration::from_secs(1_496_314_658 + 60)));
        assert_eq!(parsed.description.as_deref(), Some("1 cup coffee"));
    }

    #[test]
    fn hashed_description_is_absent() {
        let parsed = parse_invoice(TESTNET_HASHED).unwrap();
        assert_eq!(parsed.network, ChainNetwork::Testnet);
        assert_eq!(parsed.mtokens, Some(2_000_000_000));
        assert_eq!(parsed.description, None);
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_invoice("lnbc1garbage").unwrap_err();
        assert!(matches!(err, Error::InvalidInput { field: "invoice", .. }));
    }
}
