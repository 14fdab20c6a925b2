use once_cell::sync::OnceCell;
use rlp_derive::{RlpDecodable, RlpEncodable};
use sha3::Digest;

use crate::auth::Coins;
use crate::common::{
    u256_1, Addr, Bytes, Gas, Hash, NullableAddr, Wei, U256, U256RLP,
};
use crate::error::{Error, Result};

/// EIP-155 transaction payload, the Ethereum wire format.
#[derive(RlpDecodable, RlpEncodable, Clone, PartialEq, Eq, Debug)]
pub struct TxData {
    nonce: u64,
    price: Wei,
    gas: Gas,
    to: NullableAddr,
    value: Wei,
    payload: Bytes,
    v: U256RLP,
    r: U256RLP,
    s: U256RLP,
}

impl TxData {
    fn derive_chain_id(&self) -> Option<U256> {
        let v = &self.v.0;
        if v.bits() <= 64 {
            let v = v.low_u64();
            if v == 27 || v == 28 {
                return Some(U256::zero())
            }
            return v.checked_sub(35).map(|v| (v / 2).into())
        }
        Some((*v - 35) / 2)
    }

    fn protected(&self) -> bool {
        let v = &self.v.0;
        if v.bits() <= 8 {
            let v = v.low_u64();
            return v != 27 && v != 28 && v != 1 && v != 0
        }
        true
    }

    /// EIP-155 signing hash: the payload fields followed by
    /// `chain_id, 0, 0`.
    fn sig_hash(&self, chain_id: &U256) -> Hash {
        let mut stream = rlp::RlpStream::new_list(9);
        stream.append(&self.nonce).append(&self.price).append(&self.gas);
        match &self.to.0 {
            Some(addr) => stream.append(addr),
            None => stream.append_empty_data(),
        }
        .append(&self.value)
        .append(&self.payload)
        .append(&U256RLP(*chain_id))
        .append(&0u64)
        .append(&0u64);
        Hash::hash(&stream.out())
    }
}

/// Memoized signature recovery: the sender recovered for `chain_id`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SigCache {
    pub chain_id: U256,
    pub from: Addr,
}

/// An Ethereum-format transaction together with the envelope fields the
/// host chain adds around it.
#[derive(Clone, Debug)]
pub struct EthTx {
    data: TxData,
    hash: Hash,
    pub timeout_height: u64,
    pub extension_options: Vec<Bytes>,
    sig_cache: Option<SigCache>,
}

impl PartialEq for EthTx {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data &&
            self.timeout_height == other.timeout_height &&
            self.extension_options == other.extension_options
    }
}

impl EthTx {
    pub fn new(
        nonce: u64, to: Option<Addr>, amount: Wei, gas_limit: Gas,
        gas_price: Wei, payload: Bytes,
    ) -> Self {
        Self::from_data(TxData {
            nonce,
            price: gas_price,
            gas: gas_limit,
            to: NullableAddr(to),
            value: amount,
            payload,
            v: U256RLP(U256::zero()),
            r: U256RLP(U256::zero()),
            s: U256RLP(U256::zero()),
        })
    }

    pub fn new_contract(
        nonce: u64, amount: Wei, gas_limit: Gas, gas_price: Wei, code: Bytes,
    ) -> Self {
        Self::new(nonce, None, amount, gas_limit, gas_price, code)
    }

    fn from_data(data: TxData) -> Self {
        let hash = Hash::hash(&rlp::encode(&data));
        Self {
            data,
            hash,
            timeout_height: 0,
            extension_options: Vec::new(),
            sig_cache: None,
        }
    }

    /// Decode either a bare Ethereum transaction or the enveloped form
    /// produced by [EthTx::encode].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let rlp = rlp::Rlp::new(bytes);
        match rlp.item_count()? {
            9 => Ok(Self::from_data(rlp.as_val()?)),
            3 => {
                let mut tx = Self::from_data(rlp.val_at(0)?);
                tx.timeout_height = rlp.val_at(1)?;
                tx.extension_options = rlp.list_at(2)?;
                Ok(tx)
            }
            n => Err(Error::UnknownTxType(format!(
                "ethereum transaction with {} fields",
                n
            ))),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        if self.timeout_height == 0 && self.extension_options.is_empty() {
            return rlp::encode(&self.data).to_vec()
        }
        let mut stream = rlp::RlpStream::new_list(3);
        stream
            .append(&self.data)
            .append(&self.timeout_height)
            .append_list::<Bytes, _>(&self.extension_options);
        stream.out().to_vec()
    }

    /// Keccak-256 of the RLP encoded payload.
    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    pub fn nonce(&self) -> u64 {
        self.data.nonce
    }

    pub fn price(&self) -> &Wei {
        &self.data.price
    }

    pub fn gas(&self) -> Gas {
        self.data.gas
    }

    pub fn to(&self) -> Option<&Addr> {
        self.data.to.0.as_ref()
    }

    pub fn value(&self) -> &Wei {
        &self.data.value
    }

    pub fn payload(&self) -> &Bytes {
        &self.data.payload
    }

    pub fn is_contract_creation(&self) -> bool {
        self.data.to.0.is_none()
    }

    /// Chain ID the signature commits to, derived from `v`.
    pub fn chain_id(&self) -> Option<U256> {
        self.data.derive_chain_id()
    }

    pub fn sig_hash(&self, chain_id: &U256) -> Hash {
        self.data.sig_hash(chain_id)
    }

    /// `price * gas_limit`
    pub fn fee(&self) -> Option<Wei> {
        self.data.price.checked_mul(&Wei::from(self.data.gas))
    }

    /// `price * gas_limit + amount`
    pub fn cost(&self) -> Option<Wei> {
        self.fee()?.checked_add(&self.data.value)
    }

    /// Sender recovered by the last successful verification.
    pub fn from(&self) -> Option<&Addr> {
        self.sig_cache.as_ref().map(|c| &c.from)
    }

    pub fn sig_cache(&self) -> Option<&SigCache> {
        self.sig_cache.as_ref()
    }

    pub fn validate_basic(&self) -> Result<()> {
        if self.data.price.is_zero() {
            return Err(Error::InvalidTx("gas price cannot be 0".into()))
        }
        Ok(())
    }

    /// Sign with EIP-155 replay protection for `chain_id`.
    pub fn sign(
        &mut self, chain_id: &U256, secret: &libsecp256k1::SecretKey,
    ) -> Result<()> {
        let hash = self.data.sig_hash(chain_id);
        let msg = libsecp256k1::Message::parse(&hash.to_fixed_bytes());
        let (sig, recid) = libsecp256k1::sign(&msg, secret);
        let sig = sig.serialize();
        let v = if chain_id.is_zero() {
            U256::from(27 + recid.serialize() as u64)
        } else {
            chain_id
                .checked_mul(2.into())
                .and_then(|c| {
                    c.checked_add((35 + recid.serialize() as u64).into())
                })
                .ok_or_else(|| Error::InvalidChainId(chain_id.to_string()))?
        };
        self.data.v = U256RLP(v);
        self.data.r = U256RLP(U256::from_big_endian(&sig[..32]));
        self.data.s = U256RLP(U256::from_big_endian(&sig[32..]));
        self.hash = Hash::hash(&rlp::encode(&self.data));
        self.sig_cache = None;
        Ok(())
    }

    /// Recover the sender for `chain_id`, reusing the cached result when it
    /// was obtained for the same chain ID.
    pub fn verify_sig(&mut self, chain_id: &U256) -> Result<Addr> {
        if let Some(cache) = &self.sig_cache {
            if &cache.chain_id == chain_id {
                return Ok(cache.from.clone())
            }
        }
        self.sig_cache = None;
        if chain_id.is_zero() {
            return Err(Error::InvalidChainId("chain ID cannot be zero".into()))
        }
        if !self.data.protected() {
            return Err(Error::Unauthorized(
                "transaction is not replay protected".into(),
            ))
        }
        match self.data.derive_chain_id() {
            Some(id) if &id == chain_id => (),
            id => {
                return Err(Error::Unauthorized(format!(
                    "invalid chain id for signer; have {:?}, want {}",
                    id, chain_id
                )))
            }
        }
        let v = chain_id
            .checked_mul(2.into())
            .and_then(|c| self.data.v.0.checked_sub(c))
            .and_then(|v| v.checked_sub(8.into()))
            .ok_or_else(|| Error::Unauthorized("invalid signature v".into()))?;
        let from = recover_plain(
            &self.data.sig_hash(chain_id),
            self.data.r.0,
            self.data.s.0,
            v,
            true,
        )
        .ok_or_else(|| Error::Unauthorized("invalid signature".into()))?;
        self.sig_cache = Some(SigCache {
            chain_id: *chain_id,
            from: from.clone(),
        });
        Ok(from)
    }
}

#[inline]
fn secp256k1_n() -> &'static U256 {
    static V: OnceCell<U256> = OnceCell::new();
    V.get_or_init(|| {
        U256::from_big_endian(&[
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xfe, 0xba, 0xae, 0xdc, 0xe6, 0xaf, 0x48,
            0xa0, 0x3b, 0xbf, 0xd2, 0x5e, 0x8c, 0xd0, 0x36, 0x41, 0x41,
        ])
    })
}

#[inline]
fn secp256k1_half_n() -> &'static U256 {
    static V: OnceCell<U256> = OnceCell::new();
    V.get_or_init(|| secp256k1_n() / 2)
}

fn recover_plain(
    tx_hash: &Hash, r: U256, s: U256, vb: U256, homestead: bool,
) -> Option<Addr> {
    use crate::common::Bytes32;
    if vb.bits() > 8 {
        return None
    }
    let v = vb.low_u64().checked_sub(27)?;
    // `ValidateSignatureValues` in geth
    if &r < u256_1() || &s < u256_1() {
        return None
    }
    if homestead && &s > secp256k1_half_n() {
        return None
    }
    if &r >= secp256k1_n() || &s >= secp256k1_n() || (v != 0 && v != 1) {
        return None
    }
    //
    let r: Bytes32 = (&r).into();
    let s: Bytes32 = (&s).into();
    let mut r1 = libsecp256k1::curve::Scalar([0; 8]);
    let mut s1 = libsecp256k1::curve::Scalar([0; 8]);
    drop(r1.set_b32(&r));
    drop(s1.set_b32(&s));
    let sig = libsecp256k1::Signature { r: r1, s: s1 };
    let msg = libsecp256k1::Message::parse_slice(tx_hash.as_bytes()).ok()?;
    let recover_id = libsecp256k1::RecoveryId::parse(v as u8).ok()?;
    let pubkey = libsecp256k1::recover(&msg, &sig, &recover_id).ok()?;
    Some(pubkey_to_address(&pubkey))
}

/// Ethereum address of a public key: the last 20 bytes of the Keccak-256
/// of the uncompressed point.
pub fn pubkey_to_address(pubkey: &libsecp256k1::PublicKey) -> Addr {
    let raw = pubkey.serialize();
    Addr::from_slice(&sha3::Keccak256::digest(&raw[1..]).as_slice()[12..])
}

/// Verify a 64-byte compact signature over `msg` by a compressed public
/// key.
pub fn verify_secp256k1(pub_key: &[u8], msg: &Hash, signature: &[u8]) -> bool {
    let pk = match libsecp256k1::PublicKey::parse_slice(
        pub_key,
        Some(libsecp256k1::PublicKeyFormat::Compressed),
    ) {
        Ok(pk) => pk,
        Err(_) => return false,
    };
    let sig = match libsecp256k1::Signature::parse_standard_slice(signature) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    let msg = libsecp256k1::Message::parse(&msg.clone().to_fixed_bytes());
    libsecp256k1::verify(&msg, &sig, &pk)
}

/// Address bound to a compressed public key.
pub fn compressed_pubkey_address(pub_key: &[u8]) -> Option<Addr> {
    libsecp256k1::PublicKey::parse_slice(
        pub_key,
        Some(libsecp256k1::PublicKeyFormat::Compressed),
    )
    .ok()
    .map(|pk| pubkey_to_address(&pk))
}

/// Coin transfer between two accounts.
#[derive(RlpEncodable, RlpDecodable, Clone, PartialEq, Eq, Debug)]
pub struct MsgSend {
    pub from: Addr,
    pub to: Addr,
    pub amount: Coins,
}

/// An EVM call or creation carried inside a standard transaction, with an
/// explicit sender.
#[derive(RlpEncodable, RlpDecodable, Clone, PartialEq, Eq, Debug)]
pub struct MsgEthermint {
    pub account_nonce: u64,
    pub price: Wei,
    pub gas_limit: Gas,
    pub recipient: NullableAddr,
    pub amount: Wei,
    pub payload: Bytes,
    pub from: Addr,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum StdMsg {
    Send(MsgSend),
    Ethermint(MsgEthermint),
}

impl StdMsg {
    const SEND: u8 = 0;
    const ETHERMINT: u8 = 1;

    pub fn signer(&self) -> &Addr {
        match self {
            StdMsg::Send(m) => &m.from,
            StdMsg::Ethermint(m) => &m.from,
        }
    }

    pub fn route(&self) -> &'static str {
        match self {
            StdMsg::Send(_) => "bank",
            StdMsg::Ethermint(_) => "ethermint",
        }
    }

    pub fn validate_basic(&self) -> Result<()> {
        match self {
            StdMsg::Send(m) => {
                if m.from.is_zero() || m.to.is_zero() {
                    return Err(Error::InvalidTx("empty address".into()))
                }
                if m.amount.is_zero() {
                    return Err(Error::InvalidTx("send amount is zero".into()))
                }
            }
            StdMsg::Ethermint(m) => {
                if m.price.is_zero() {
                    return Err(Error::InvalidTx("gas price cannot be 0".into()))
                }
                if m.from.is_zero() {
                    return Err(Error::InvalidTx("sender cannot be empty".into()))
                }
            }
        }
        Ok(())
    }
}

impl rlp::Encodable for StdMsg {
    fn rlp_append(&self, s: &mut rlp::RlpStream) {
        s.begin_list(2);
        match self {
            StdMsg::Send(m) => s.append(&Self::SEND).append(m),
            StdMsg::Ethermint(m) => s.append(&Self::ETHERMINT).append(m),
        };
    }
}

impl rlp::Decodable for StdMsg {
    fn decode(rlp: &rlp::Rlp) -> std::result::Result<Self, rlp::DecoderError> {
        match rlp.val_at::<u8>(0)? {
            Self::SEND => Ok(StdMsg::Send(rlp.val_at(1)?)),
            Self::ETHERMINT => Ok(StdMsg::Ethermint(rlp.val_at(1)?)),
            _ => Err(rlp::DecoderError::Custom("unknown message type")),
        }
    }
}

#[derive(RlpEncodable, RlpDecodable, Clone, PartialEq, Eq, Debug)]
pub struct StdFee {
    pub amount: Coins,
    pub gas: Gas,
}

#[derive(RlpEncodable, RlpDecodable, Clone, PartialEq, Eq, Debug)]
pub struct StdSignature {
    /// Compressed secp256k1 key; may be empty once the account has one.
    pub pub_key: Bytes,
    pub signature: Bytes,
}

/// Standard-format transaction: messages signed by their signers, fee
/// paid by the first signer.
#[derive(RlpEncodable, RlpDecodable, Clone, PartialEq, Eq, Debug)]
pub struct StdTx {
    pub msgs: Vec<StdMsg>,
    pub fee: StdFee,
    pub signatures: Vec<StdSignature>,
    pub memo: String,
    pub timeout_height: u64,
}

impl StdTx {
    /// Unique signers in message order.
    pub fn signers(&self) -> Vec<Addr> {
        let mut signers: Vec<Addr> = Vec::new();
        for msg in self.msgs.iter() {
            if !signers.contains(msg.signer()) {
                signers.push(msg.signer().clone())
            }
        }
        signers
    }

    pub fn fee_payer(&self) -> Option<Addr> {
        self.msgs.first().map(|m| m.signer().clone())
    }

    /// Digest each signer signs.
    pub fn sign_bytes(
        &self, chain_id: &str, account_number: u64, sequence: u64,
    ) -> Hash {
        let mut stream = rlp::RlpStream::new_list(7);
        stream
            .append(&chain_id)
            .append(&account_number)
            .append(&sequence)
            .append(&self.fee)
            .append_list::<StdMsg, _>(&self.msgs)
            .append(&self.memo)
            .append(&self.timeout_height);
        Hash::hash(&stream.out())
    }

    pub fn encode(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }

    pub fn size(&self) -> usize {
        self.encode().len()
    }

    pub fn validate_basic(&self) -> Result<()> {
        if self.msgs.is_empty() {
            return Err(Error::InvalidTx("must contain at least one message".into()))
        }
        for msg in self.msgs.iter() {
            msg.validate_basic()?
        }
        if self.signatures.is_empty() {
            return Err(Error::Unauthorized("no signers".into()))
        }
        let signers = self.signers();
        if self.signatures.len() != signers.len() {
            return Err(Error::Unauthorized(format!(
                "wrong number of signers; expected {}, got {}",
                signers.len(),
                self.signatures.len()
            )))
        }
        Ok(())
    }
}

/// Sign `msg` with `secret`, returning the 64-byte compact signature.
pub fn sign_secp256k1(secret: &libsecp256k1::SecretKey, msg: &Hash) -> Bytes {
    let msg = libsecp256k1::Message::parse(&msg.clone().to_fixed_bytes());
    let (sig, _) = libsecp256k1::sign(&msg, secret);
    sig.serialize().to_vec().into()
}

/// Transactions routed through the admission pipeline.
#[derive(Clone, Debug)]
pub enum Tx {
    Std(StdTx),
    Eth(EthTx),
}

impl Tx {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let rlp = rlp::Rlp::new(bytes);
        if !rlp.is_list() {
            return Err(Error::UnknownTxType("not an RLP list".into()))
        }
        match rlp.item_count()? {
            5 => Ok(Tx::Std(rlp.as_val()?)),
            3 | 9 => Ok(Tx::Eth(EthTx::decode(bytes)?)),
            n => Err(Error::UnknownTxType(format!("{} fields", n))),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Tx::Std(tx) => tx.encode(),
            Tx::Eth(tx) => tx.encode(),
        }
    }

    pub fn gas(&self) -> Gas {
        match self {
            Tx::Std(tx) => tx.fee.gas,
            Tx::Eth(tx) => tx.gas(),
        }
    }

    pub fn hash(&self) -> Hash {
        match self {
            Tx::Std(tx) => Hash::hash(&tx.encode()),
            Tx::Eth(tx) => tx.hash().clone(),
        }
    }
}
