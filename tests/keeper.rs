use rand::seq::SliceRandom;

use evmhost::common::{Addr, Bloom, Bytes, Hash, Log, NullableAddr};
use evmhost::context::ExecMode;
use evmhost::error::Error;
use evmhost::evm::StateDb;
use evmhost::params::{ChainConfig, Params};
use evmhost::state_transition::decode_result_data;
use evmhost::context::Context;
use evmhost::store::keys;
use evmhost::tx::MsgEthermint;
use evmhost_tools::dummy::{OP_LOG, OP_RETURN};
use evmhost_tools::keys::TestKey;
use evmhost_tools::{block_hash, header, TestEnv, EIP155_CHAIN_ID};

fn log(seed: u8, tx_hash: &Hash) -> Log {
    Log {
        address: Addr::from([seed; 20]),
        topics: vec![Hash::hash(&[seed])],
        data: vec![seed].into(),
        tx_hash: tx_hash.clone(),
        ..Default::default()
    }
}

#[test]
fn test_block_hash_history() {
    let env = TestEnv::new();
    let ctx = env.ctx(5, ExecMode::Deliver);
    env.keeper.begin_block(&ctx).unwrap();
    assert_eq!(
        env.keeper.get_block_hash_mapping(&env.store, &block_hash(4)),
        Some(4)
    );
    assert_eq!(env.keeper.get_height_hash(&env.store, 4), Some(block_hash(4)));
    // the current block is recorded by its successor
    assert_eq!(env.keeper.get_block_hash_mapping(&env.store, &block_hash(5)), None);

    // nothing precedes the genesis block
    let env = TestEnv::new();
    env.keeper.begin_block(&env.ctx(0, ExecMode::Deliver)).unwrap();
    assert!(env.store.iter_prefix(&[keys::PREFIX_BLOCK_HASH]).is_empty());

    env.keeper.set_block_hash_mapping(&env.store, &Hash::default(), 9);
    assert_eq!(env.keeper.get_block_hash_mapping(&env.store, &Hash::default()), None);
}

#[test]
fn test_logs_store() {
    let env = TestEnv::new();
    let tx_hash = Hash::hash(b"tx");
    assert!(matches!(
        env.keeper.get_logs(&env.store, &tx_hash),
        Err(Error::LogsNotFound(_))
    ));
    assert!(matches!(
        env.keeper.set_logs(&env.store, &tx_hash, &[]),
        Err(Error::EmptyLogs(_))
    ));
    let logs = vec![log(1, &tx_hash), log(2, &tx_hash)];
    env.keeper.set_logs(&env.store, &tx_hash, &logs).unwrap();
    assert_eq!(env.keeper.get_logs(&env.store, &tx_hash).unwrap(), logs);
    assert_eq!(env.keeper.all_logs(&env.store), vec![(tx_hash.clone(), logs)]);
    env.keeper.delete_logs(&env.store, &tx_hash);
    assert!(env.keeper.get_logs(&env.store, &tx_hash).is_err());
}

#[test]
fn test_governance_data() {
    let env = TestEnv::new();
    assert_eq!(env.keeper.get_params(&env.store).unwrap(), Params::default());
    assert_eq!(
        env.keeper.get_chain_config(&env.store).unwrap(),
        ChainConfig::default()
    );
    let bad = Params {
        evm_denom: "1x".into(),
        ..Default::default()
    };
    assert!(env.keeper.set_params(&env.store, &bad).is_err());

    let env = TestEnv::new();
    env.store.delete(&keys::chain_config());
    assert_eq!(
        env.keeper.get_chain_config(&env.store),
        Err(Error::ChainConfigNotFound)
    );
    let mut ctx = env.ctx(1, ExecMode::Deliver);
    let mut session = env.keeper.begin_block(&ctx).unwrap();
    let key = TestKey::new(1);
    env.fund(&key.address(), 1_000_000);
    let mut tx = key.transfer(EIP155_CHAIN_ID, 0, &Addr::from([2; 20]), 1.into(), 21000, 1.into());
    let err = env.keeper.ethereum_tx(&mut ctx, &mut session, &mut tx).unwrap_err();
    assert_eq!(err, Error::ChainConfigNotFound);
    assert_eq!(err.kind(), evmhost::error::ErrorKind::Fatal);
}

#[test]
fn test_block_lifecycle() {
    let env = TestEnv::new();
    let key = TestKey::new(1);
    let sender = key.address();
    env.fund(&sender, 10_000_000);

    // deploy a logging contract in block 1
    let mut ctx = env.ctx(1, ExecMode::Deliver);
    let mut session = env.keeper.begin_block(&ctx).unwrap();
    let mut deploy = key.deploy(EIP155_CHAIN_ID, 0, vec![OP_LOG, OP_RETURN].into(), 100_000, 1.into());
    let res = env
        .keeper
        .ethereum_tx(&mut ctx, &mut session, &mut deploy)
        .unwrap();
    let contract = decode_result_data(&res.result.data)
        .unwrap()
        .contract_address
        .0
        .unwrap();
    assert_eq!(session.tx_count(), 1);
    // nothing logged, nothing persisted
    assert!(env.keeper.get_logs(&env.store, deploy.hash()).is_err());
    let bloom = env.keeper.end_block(&ctx, session).unwrap();
    assert!(bloom.is_zero());
    assert_eq!(env.keeper.get_block_bloom(&env.store, 1).unwrap(), bloom);

    // two calls in block 2
    let mut ctx = env.ctx(2, ExecMode::Deliver);
    let mut session = env.keeper.begin_block(&ctx).unwrap();
    assert_eq!(session.tx_count(), 0);
    assert!(session.bloom().is_zero());
    let mut hashes = Vec::new();
    for (nonce, input) in [(1, b"a"), (2, b"b")] {
        let mut tx = key.call(
            EIP155_CHAIN_ID,
            nonce,
            &contract,
            Bytes::from(&input[..]),
            100_000,
            1.into(),
        );
        env.keeper.ethereum_tx(&mut ctx, &mut session, &mut tx).unwrap();
        hashes.push(tx.hash().clone());
    }
    assert_eq!(session.tx_count(), 2);
    let logs_a = env.keeper.get_logs(&env.store, &hashes[0]).unwrap();
    let logs_b = env.keeper.get_logs(&env.store, &hashes[1]).unwrap();
    assert_eq!(logs_a[0].tx_index, 0);
    assert_eq!(logs_b[0].tx_index, 1);
    assert_eq!(logs_b[0].block_hash, header(2).hash);
    assert_eq!(logs_a[0].index, 0);
    assert_eq!(logs_b[0].index, 1);
    let expected = Bloom::from_logs(&logs_a) | &Bloom::from_logs(&logs_b);
    assert_eq!(session.bloom(), &expected);
    let bloom = env.keeper.end_block(&ctx, session).unwrap();
    assert_eq!(bloom, expected);
    assert_eq!(env.keeper.get_block_bloom(&env.store, 2).unwrap(), expected);
    assert!(matches!(
        env.keeper.get_block_bloom(&env.store, 3),
        Err(Error::BloomNotFound(3))
    ));
}

#[test]
fn test_check_mode_leaves_session_alone() {
    let env = TestEnv::new();
    let key = TestKey::new(1);
    let recipient = Addr::from([2; 20]);
    env.fund(&key.address(), 1_000_000);
    let mut ctx = env.ctx(1, ExecMode::Check);
    let mut session = env.keeper.begin_block(&ctx).unwrap();
    let mut tx = key.transfer(EIP155_CHAIN_ID, 0, &recipient, 100.into(), 21000, 1.into());
    env.keeper.ethereum_tx(&mut ctx, &mut session, &mut tx).unwrap();
    assert_eq!(session.tx_count(), 0);
    assert!(session.bloom().is_zero());
    assert_eq!(env.balance(&recipient), 0.into());
    assert_eq!(session.state_mut().get_balance(&recipient), 0.into());
}

#[test]
fn test_ethermint_msg() {
    let env = TestEnv::new();
    let from = Addr::from([1; 20]);
    let to = Addr::from([2; 20]);
    env.fund(&from, 1_000_000);
    let mut ctx = env.ctx(1, ExecMode::Deliver);
    let mut session = env.keeper.begin_block(&ctx).unwrap();
    let msg = MsgEthermint {
        account_nonce: 0,
        price: 1.into(),
        gas_limit: 50_000,
        recipient: NullableAddr(Some(to.clone())),
        amount: 300.into(),
        payload: Bytes::empty(),
        from: from.clone(),
    };
    env.keeper
        .ethermint_msg(&mut ctx, &mut session, &msg, Hash::hash(b"std"))
        .unwrap();
    assert_eq!(env.balance(&to), 300.into());
    assert_eq!(env.balance(&from), (1_000_000 - 300).into());
    assert_eq!(session.tx_count(), 1);

    // the context must carry an EIP-155 style chain identifier
    let mut hdr = header(1);
    hdr.chain_id = "ethermint".into();
    let mut ctx = Context::new(env.store.clone(), hdr, ExecMode::Deliver);
    assert!(matches!(
        env.keeper.ethermint_msg(&mut ctx, &mut session, &msg, Hash::hash(b"std2")),
        Err(Error::InvalidChainId(_))
    ));
}

#[test]
fn test_bloom_accumulation_commutes() {
    let tx_hash = Hash::hash(b"tx");
    let mut blooms: Vec<Bloom> = (1..=16u8)
        .map(|i| Bloom::from_logs(&[log(i, &tx_hash)]))
        .collect();
    let fold = |blooms: &[Bloom]| {
        blooms.iter().fold(Bloom::default(), |acc, b| acc | b)
    };
    let expected = fold(&blooms);
    let mut rng = rand::thread_rng();
    for _ in 0..10 {
        blooms.shuffle(&mut rng);
        assert_eq!(fold(&blooms), expected);
    }
    for i in 1..=16u8 {
        assert!(expected.contains_input(Addr::from([i; 20]).as_bytes()));
    }
}
