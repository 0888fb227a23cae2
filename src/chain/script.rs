use bitcoin::bech32::{self, Hrp};
use bitcoin::hashes::{Hash as _, hash160, sha256};
use bitcoin::opcodes::{self, Opcode};
use bitcoin::script::{Builder, Instruction, PushBytesBuf, Script, ScriptBuf};
use bitcoin::secp256k1::PublicKey;
use serde::Serialize;

use crate::chain::network::ChainNetwork;
use crate::error::{Error, Result};

/// Highest absolute locktime value still interpreted as a block height.
const MAX_LOCKTIME_HEIGHT: u32 = 499_999_999;

/// Who may take the refund branch once the timeout passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundIdentity {
    PublicKey(PublicKey),
    PublicKeyHash([u8; 20]),
}

impl RefundIdentity {
    /// Builds the refund identity from wire-level optional fields, exactly one
    /// of which must be present.
    pub fn from_parts(public_key: Option<&[u8]>, public_key_hash: Option<&[u8]>) -> Result<Self> {
        match (public_key, public_key_hash) {
            (Some(key), None) => PublicKey::from_slice(key)
                .map(Self::PublicKey)
                .map_err(|e| Error::invalid_input("refund_public_key", e.to_string())),
            (None, Some(hash)) => <[u8; 20]>::try_from(hash)
                .map(Self::PublicKeyHash)
                .map_err(|_| {
                    Error::invalid_input("refund_public_key_hash", "expected 20 bytes")
                }),
            (Some(_), Some(_)) => Err(Error::invalid_input(
                "refund_identity",
                "refund public key and refund public key hash are mutually exclusive",
            )),
            (None, None) => Err(Error::invalid_input(
                "refund_identity",
                "refund public key or refund public key hash is required",
            )),
        }
    }

    /// Whether `key` satisfies this identity.
    pub fn matches(&self, key: &PublicKey) -> bool {
        match self {
            RefundIdentity::PublicKey(refund) => refund == key,
            RefundIdentity::PublicKeyHash(hash) => pubkey_hash160(&key.serialize()) == *hash,
        }
    }
}

/// Parameters of a hash-locked, time-locked swap output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapScript {
    pub payment_hash: [u8; 32],
    pub destination_public_key: PublicKey,
    pub timeout_block_height: u32,
    pub refund: RefundIdentity,
}

impl SwapScript {
    pub fn new(
        payment_hash: &[u8],
        destination_public_key: PublicKey,
        timeout_block_height: u32,
        refund: RefundIdentity,
    ) -> Result<Self> {
        let payment_hash = <[u8; 32]>::try_from(payment_hash)
            .map_err(|_| Error::invalid_input("payment_hash", "expected 32 bytes"))?;
        if timeout_block_height > MAX_LOCKTIME_HEIGHT {
            return Err(Error::invalid_input(
                "timeout_block_height",
                format!("{timeout_block_height} is a timestamp, not a block height"),
            ));
        }

        Ok(Self {
            payment_hash,
            destination_public_key,
            timeout_block_height,
            refund,
        })
    }

    /// The redeem script. Output is byte-for-byte stable for equal parameters,
    /// both parties derive the same address from it.
    pub fn redeem_script(&self) -> Result<ScriptBuf> {
        use opcodes::all::*;

        let destination = self.destination_public_key.serialize();
        let cltv = i64::from(self.timeout_block_height);

        let builder = match self.refund {
            RefundIdentity::PublicKey(refund_key) => {
                let builder = Builder::new().push_opcode(OP_SHA256);
                let builder = push_data(builder, &self.payment_hash)?
                    .push_opcode(OP_EQUAL)
                    .push_opcode(OP_IF);
                let builder = push_data(builder, &destination)?
                    .push_opcode(OP_ELSE)
                    .push_int(cltv)
                    .push_opcode(OP_CLTV)
                    .push_opcode(OP_DROP);
                push_data(builder, &refund_key.serialize())?
            }
            RefundIdentity::PublicKeyHash(refund_hash) => {
                let builder = Builder::new().push_opcode(OP_DUP).push_opcode(OP_SHA256);
                let builder = push_data(builder, &self.payment_hash)?
                    .push_opcode(OP_EQUAL)
                    .push_opcode(OP_IF)
                    .push_opcode(OP_DROP);
                let builder = push_data(builder, &destination)?
                    .push_opcode(OP_ELSE)
                    .push_int(cltv)
                    .push_opcode(OP_CLTV)
                    .push_opcode(OP_DROP)
                    .push_opcode(OP_DUP)
                    .push_opcode(OP_HASH160);
                push_data(builder, &refund_hash)?.push_opcode(OP_EQUALVERIFY)
            }
        };

        Ok(builder
            .push_opcode(OP_ENDIF)
            .push_opcode(OP_CHECKSIG)
            .into_script())
    }

    /// Recovers the parameters of a redeem script built by [`SwapScript::redeem_script`].
    pub fn parse(redeem_script: &Script) -> Result<Self> {
        use opcodes::all::*;

        fn malformed(reason: impl Into<String>) -> Error {
            Error::invalid_input("redeem_script", reason)
        }

        fn next_instruction<'a>(
            iter: &mut impl Iterator<
                Item = std::result::Result<Instruction<'a>, bitcoin::script::Error>,
            >,
        ) -> Result<Instruction<'a>> {
            iter.next()
                .transpose()
                .map_err(|e| malformed(format!("decode instruction: {e}")))?
                .ok_or_else(|| malformed("unexpected end of script"))
        }

        fn expect_op(actual: Instruction<'_>, expected: Opcode) -> Result<()> {
            match actual {
                Instruction::Op(op) if op == expected => Ok(()),
                other => Err(malformed(format!(
                    "expected {expected:?}, got {other:?}"
                ))),
            }
        }

        fn parse_script_num(actual: Instruction<'_>) -> Result<i64> {
            match actual {
                Instruction::PushBytes(bytes) => decode_script_num(bytes.as_bytes()),
                Instruction::Op(op) => {
                    let code = op.to_u8();
                    let one = OP_PUSHNUM_1.to_u8();
                    let sixteen = OP_PUSHNUM_16.to_u8();
                    if (one..=sixteen).contains(&code) {
                        return Ok(i64::from(code - one + 1));
                    }
                    Err(malformed(format!("expected script number, got {op:?}")))
                }
            }
        }

        fn decode_script_num(bytes: &[u8]) -> Result<i64> {
            if bytes.is_empty() {
                return Ok(0);
            }
            if bytes.len() > 5 {
                return Err(malformed(format!(
                    "locktime number too large: {} bytes",
                    bytes.len()
                )));
            }

            let mut magnitude = bytes.to_vec();
            let negative = magnitude.last().is_some_and(|b| (b & 0x80) != 0);
            if let Some(last) = magnitude.last_mut() {
                *last &= 0x7f;
            }

            let mut value: i64 = 0;
            for (i, b) in magnitude.iter().enumerate() {
                value |= i64::from(*b) << (8 * i);
            }

            Ok(if negative { -value } else { value })
        }

        fn expect_push<const N: usize>(actual: Instruction<'_>) -> Result<[u8; N]> {
            match actual {
                Instruction::PushBytes(bytes) if bytes.len() == N => {
                    let mut out = [0u8; N];
                    out.copy_from_slice(bytes.as_bytes());
                    Ok(out)
                }
                other => Err(malformed(format!("expected push of {N} bytes, got {other:?}"))),
            }
        }

        let mut iter = redeem_script.instructions_minimal();

        let first = next_instruction(&mut iter)?;
        let hash_refund = matches!(first, Instruction::Op(op) if op == OP_DUP);
        if hash_refund {
            expect_op(next_instruction(&mut iter)?, OP_SHA256)?;
        } else {
            expect_op(first, OP_SHA256)?;
        }
        let payment_hash = expect_push::<32>(next_instruction(&mut iter)?)?;
        expect_op(next_instruction(&mut iter)?, OP_EQUAL)?;
        expect_op(next_instruction(&mut iter)?, OP_IF)?;
        if hash_refund {
            expect_op(next_instruction(&mut iter)?, OP_DROP)?;
        }
        let destination = expect_push::<33>(next_instruction(&mut iter)?)?;
        let destination_public_key = PublicKey::from_slice(&destination)
            .map_err(|e| malformed(format!("destination key: {e}")))?;

        expect_op(next_instruction(&mut iter)?, OP_ELSE)?;
        let timeout = parse_script_num(next_instruction(&mut iter)?)?;
        let timeout_block_height = u32::try_from(timeout)
            .map_err(|_| malformed(format!("timeout out of range: {timeout}")))?;
        expect_op(next_instruction(&mut iter)?, OP_CLTV)?;
        expect_op(next_instruction(&mut iter)?, OP_DROP)?;

        let refund = if hash_refund {
            expect_op(next_instruction(&mut iter)?, OP_DUP)?;
            expect_op(next_instruction(&mut iter)?, OP_HASH160)?;
            let hash = expect_push::<20>(next_instruction(&mut iter)?)?;
            expect_op(next_instruction(&mut iter)?, OP_EQUALVERIFY)?;
            RefundIdentity::PublicKeyHash(hash)
        } else {
            let key = expect_push::<33>(next_instruction(&mut iter)?)?;
            RefundIdentity::PublicKey(
                PublicKey::from_slice(&key).map_err(|e| malformed(format!("refund key: {e}")))?,
            )
        };

        expect_op(next_instruction(&mut iter)?, OP_ENDIF)?;
        expect_op(next_instruction(&mut iter)?, OP_CHECKSIG)?;
        if iter.next().is_some() {
            return Err(malformed("unexpected trailing instructions"));
        }

        Self::new(
            &payment_hash,
            destination_public_key,
            timeout_block_height,
            refund,
        )
    }
}

/// Composes the swap redeem script from raw caller inputs.
pub fn compose_redeem_script(
    payment_hash: &[u8],
    destination_public_key: &[u8],
    timeout_block_height: u32,
    refund_identity: RefundIdentity,
) -> Result<ScriptBuf> {
    let destination_public_key = PublicKey::from_slice(destination_public_key)
        .map_err(|e| Error::invalid_input("destination_public_key", e.to_string()))?;
    SwapScript::new(
        payment_hash,
        destination_public_key,
        timeout_block_height,
        refund_identity,
    )?
    .redeem_script()
}

fn push_data(builder: Builder, data: &[u8]) -> Result<Builder> {
    let push = PushBytesBuf::try_from(data.to_vec())
        .map_err(|e| Error::invalid_input("push_data", format!("{} bytes: {e}", data.len())))?;
    Ok(builder.push_slice(push))
}

/// Addresses paying to a swap redeem script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapAddress {
    /// `0x00 0x20 <sha256(redeem_script)>`, hex encoded.
    pub witness_program: String,
    pub witness_address: String,
    pub nested_address: String,
    pub p2sh_address: String,
}

pub fn witness_program(redeem_script: &Script) -> Vec<u8> {
    let mut program = vec![0x00, 0x20];
    program.extend_from_slice(&sha256::Hash::hash(redeem_script.as_bytes()).to_byte_array());
    program
}

pub fn derive_addresses(redeem_script: &Script, network: ChainNetwork) -> Result<SwapAddress> {
    let params = network.params();
    let program = witness_program(redeem_script);

    let hrp = Hrp::parse(params.bech32_hrp)
        .map_err(|e| Error::invalid_input("network", format!("bech32 hrp: {e}")))?;
    let witness_address = bech32::segwit::encode(hrp, bech32::segwit::VERSION_0, &program[2..])
        .map_err(|e| Error::invalid_input("redeem_script", format!("encode witness address: {e}")))?;

    let nested_address = base58_address(params.p2sh_version, &pubkey_hash160(&program));
    let p2sh_address = base58_address(params.p2sh_version, &pubkey_hash160(redeem_script.as_bytes()));

    Ok(SwapAddress {
        witness_program: hex::encode(&program),
        witness_address,
        nested_address,
        p2sh_address,
    })
}

/// Converts an address of `network` into the output script it pays to.
pub fn decode_address(address: &str, network: ChainNetwork) -> Result<ScriptBuf> {
    let params = network.params();

    if let Ok((hrp, version, program)) = bech32::segwit::decode(address) {
        if hrp.to_string().to_ascii_lowercase() != params.bech32_hrp {
            return Err(Error::invalid_address(
                address,
                format!("not a {network} address"),
            ));
        }
        let builder = Builder::new().push_int(i64::from(version.to_u8()));
        return Ok(push_data(builder, &program)
            .map_err(|e| Error::invalid_address(address, e.to_string()))?
            .into_script());
    }

    let payload = bitcoin::base58::decode_check(address)
        .map_err(|e| Error::invalid_address(address, e.to_string()))?;
    let (version, hash) = match payload.split_first() {
        Some((version, hash)) if hash.len() == 20 => (*version, hash),
        _ => return Err(Error::invalid_address(address, "unexpected payload length")),
    };

    use opcodes::all::*;
    let builder = if version == params.p2pkh_version {
        let builder = Builder::new().push_opcode(OP_DUP).push_opcode(OP_HASH160);
        push_data(builder, hash)?
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG)
    } else if version == params.p2sh_version {
        push_data(Builder::new().push_opcode(OP_HASH160), hash)?.push_opcode(OP_EQUAL)
    } else {
        return Err(Error::invalid_address(
            address,
            format!("version byte {version:#04x} is not a {network} address"),
        ));
    };
    Ok(builder.into_script())
}

fn base58_address(version: u8, hash: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(version);
    payload.extend_from_slice(hash);
    bitcoin::base58::encode_check(&payload)
}

pub fn sha256_preimage(preimage: &[u8; 32]) -> [u8; 32] {
    sha256::Hash::hash(preimage).to_byte_array()
}

pub fn pubkey_hash160(bytes: &[u8]) -> [u8; 20] {
    hash160::Hash::hash(bytes).to_byte_array()
}
