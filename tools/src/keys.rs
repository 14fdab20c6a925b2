use evmhost::auth::{AccountKeeper, Coins};
use evmhost::common::{Addr, Bytes, Gas, Hash, Wei, U256};
use evmhost::store::StoreHandle;
use evmhost::tx::{
    pubkey_to_address, sign_secp256k1, EthTx, StdFee, StdMsg, StdSignature, StdTx,
};

/// A deterministic secp256k1 key derived from a seed.
#[derive(Clone)]
pub struct TestKey {
    secret: libsecp256k1::SecretKey,
    public: libsecp256k1::PublicKey,
}

impl TestKey {
    pub fn new(seed: u64) -> Self {
        let secret = libsecp256k1::SecretKey::parse(
            &Hash::hash(&seed.to_be_bytes()).to_fixed_bytes(),
        )
        .expect("keccak digest is a valid secret key");
        let public = libsecp256k1::PublicKey::from_secret_key(&secret);
        Self { secret, public }
    }

    pub fn address(&self) -> Addr {
        pubkey_to_address(&self.public)
    }

    pub fn secret(&self) -> &libsecp256k1::SecretKey {
        &self.secret
    }

    /// Compressed public key.
    pub fn pub_key(&self) -> Bytes {
        self.public.serialize_compressed().to_vec().into()
    }

    pub fn sign_eth(&self, mut tx: EthTx, chain_id: u64) -> EthTx {
        tx.sign(&U256::from(chain_id), &self.secret)
            .expect("chain id fits");
        tx
    }

    /// A signed value transfer.
    pub fn transfer(
        &self, chain_id: u64, nonce: u64, to: &Addr, amount: Wei, gas: Gas,
        price: Wei,
    ) -> EthTx {
        self.sign_eth(
            EthTx::new(nonce, Some(to.clone()), amount, gas, price, Bytes::empty()),
            chain_id,
        )
    }

    /// A signed contract creation.
    pub fn deploy(
        &self, chain_id: u64, nonce: u64, code: Bytes, gas: Gas, price: Wei,
    ) -> EthTx {
        self.sign_eth(
            EthTx::new_contract(nonce, Wei::from(0), gas, price, code),
            chain_id,
        )
    }

    /// A signed call with `input`.
    pub fn call(
        &self, chain_id: u64, nonce: u64, to: &Addr, input: Bytes, gas: Gas,
        price: Wei,
    ) -> EthTx {
        self.sign_eth(
            EthTx::new(nonce, Some(to.clone()), Wei::from(0), gas, price, input),
            chain_id,
        )
    }
}

/// Build a standard transaction signed by `signers`, which must be given in
/// the signer order of `msgs`. Account numbers and sequences are read from
/// `store`; missing accounts sign with zeros.
pub fn std_tx(
    store: &StoreHandle, ak: &dyn AccountKeeper, chain_id: &str,
    msgs: Vec<StdMsg>, fee: Coins, gas: Gas, memo: &str, signers: &[&TestKey],
) -> StdTx {
    let mut tx = StdTx {
        msgs,
        fee: StdFee { amount: fee, gas },
        signatures: Vec::new(),
        memo: memo.into(),
        timeout_height: 0,
    };
    for key in signers {
        let (number, sequence) = ak
            .get_account(store, &key.address())
            .map(|acc| (acc.account_number, acc.sequence))
            .unwrap_or((0, 0));
        let digest = tx.sign_bytes(chain_id, number, sequence);
        tx.signatures.push(StdSignature {
            pub_key: key.pub_key(),
            signature: sign_secp256k1(key.secret(), &digest),
        });
    }
    tx
}
