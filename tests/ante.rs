use evmhost::auth::{fee_collector, Coin};
use evmhost::common::{Addr, Bytes, Wei};
use evmhost::context::{Context, ExecMode};
use evmhost::error::{Error, ErrorKind};
use evmhost::tx::{MsgSend, StdMsg, Tx};
use evmhost_tools::keys::{std_tx, TestKey};
use evmhost_tools::{coins, header, TestEnv, DENOM, EIP155_CHAIN_ID};

fn recipient() -> Addr {
    Addr::from([0xbb; 20])
}

fn eth_transfer(key: &TestKey, nonce: u64, gas: u64, price: u64) -> Tx {
    Tx::Eth(key.transfer(
        EIP155_CHAIN_ID,
        nonce,
        &recipient(),
        Wei::from(10),
        gas,
        price.into(),
    ))
}

#[test]
fn test_eth_deliver_charges_fee_and_bumps_sequence() {
    let env = TestEnv::new();
    let key = TestKey::new(1);
    env.fund(&key.address(), 1_000_000);

    let mut ctx = env.ctx(1, ExecMode::Deliver);
    let mut tx = eth_transfer(&key, 0, 30_000, 2);
    env.ante().handle(&mut ctx, &mut tx, false).unwrap();

    assert_eq!(env.balance(&key.address()), Wei::from(1_000_000 - 60_000));
    assert_eq!(env.balance(&fee_collector()), Wei::from(60_000));
    assert_eq!(env.nonce(&key.address()), 1);
    // bounded by the gas limit, intrinsic cost already charged
    assert_eq!(ctx.gas_meter().limit(), 30_000);
    assert_eq!(ctx.gas_meter().gas_consumed(), 21_000);
    // the recovered sender is cached for the handler
    match &tx {
        Tx::Eth(tx) => assert_eq!(tx.from(), Some(&key.address())),
        _ => unreachable!(),
    }

    // replaying the same nonce fails
    let mut ctx = env.ctx(1, ExecMode::Deliver);
    let mut replay = eth_transfer(&key, 0, 30_000, 2);
    let err = env.ante().handle(&mut ctx, &mut replay, false).unwrap_err();
    assert_eq!(err, Error::InvalidSequence { expected: 1, got: 0 });
    assert_eq!(err.code(), 7);
}

#[test]
fn test_eth_check_keeps_sequence() {
    let env = TestEnv::new();
    let key = TestKey::new(1);
    env.fund(&key.address(), 1_000_000);

    let mut ctx = env.ctx(1, ExecMode::Check);
    let mut tx = eth_transfer(&key, 0, 21_000, 1);
    env.ante().handle(&mut ctx, &mut tx, false).unwrap();
    assert_eq!(env.nonce(&key.address()), 0);
    assert_eq!(env.balance(&key.address()), Wei::from(1_000_000 - 21_000));

    // a simulated run does advance it, under an unbounded meter
    let mut ctx = env.ctx(1, ExecMode::Check);
    let mut tx = eth_transfer(&key, 0, 21_000, 1);
    env.ante().handle(&mut ctx, &mut tx, true).unwrap();
    assert_eq!(env.nonce(&key.address()), 1);
    assert!(ctx.gas_meter().is_infinite());
}

#[test]
fn test_eth_rejections() {
    let env = TestEnv::new();
    let key = TestKey::new(1);
    env.fund(&key.address(), 1_000_000);
    let ante = env.ante();

    let mut ctx = env.ctx(1, ExecMode::Deliver);
    let err = ante
        .handle(&mut ctx, &mut eth_transfer(&key, 0, 20_000, 1), false)
        .unwrap_err();
    assert_eq!(
        err,
        Error::IntrinsicGasTooLow {
            got: 20_000,
            required: 21_000
        }
    );

    // signed for chain 3, presented to chain 4
    let mut hdr = header(1);
    hdr.chain_id = "ethermint-4".into();
    let mut ctx = Context::new(env.store.clone(), hdr, ExecMode::Deliver);
    let err = ante
        .handle(&mut ctx, &mut eth_transfer(&key, 0, 21_000, 1), false)
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
    assert_eq!(err.kind(), ErrorKind::Admission);

    let mut ctx = env.ctx(1, ExecMode::Deliver);
    let err = ante
        .handle(&mut ctx, &mut eth_transfer(&key, 5, 21_000, 1), false)
        .unwrap_err();
    assert_eq!(err, Error::InvalidSequence { expected: 0, got: 5 });

    let mut ctx = env.ctx(1, ExecMode::Deliver);
    let err = ante
        .handle(&mut ctx, &mut eth_transfer(&key, 0, 21_000, 0), false)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTx(_)));

    let mut tx = key.transfer(EIP155_CHAIN_ID, 0, &recipient(), 1.into(), 21_000, 1.into());
    tx.timeout_height = 3;
    let mut ctx = env.ctx(4, ExecMode::Deliver);
    let err = ante.handle(&mut ctx, &mut Tx::Eth(tx.clone()), false).unwrap_err();
    assert_eq!(err, Error::TxTimeoutHeight { timeout: 3, height: 4 });

    tx.timeout_height = 0;
    tx.extension_options.push(Bytes::from(vec![1]));
    let mut ctx = env.ctx(1, ExecMode::Deliver);
    let err = ante.handle(&mut ctx, &mut Tx::Eth(tx), false).unwrap_err();
    assert_eq!(err, Error::UnknownExtensionOptions);

    // nothing was charged along the way
    assert_eq!(env.balance(&key.address()), Wei::from(1_000_000));
    assert_eq!(env.nonce(&key.address()), 0);
}

#[test]
fn test_eth_mempool_fee() {
    let env = TestEnv::new();
    let key = TestKey::new(1);
    env.fund(&key.address(), 1_000_000);
    let min_prices = vec![Coin::new(DENOM, Wei::from(2))];

    let mut ctx = env
        .ctx(1, ExecMode::Check)
        .with_min_gas_prices(min_prices.clone());
    let err = env
        .ante()
        .handle(&mut ctx, &mut eth_transfer(&key, 0, 21_000, 1), false)
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientFee(_)));
    assert_eq!(err.code(), 13);

    // simulation and block execution ignore the local minimum
    let mut ctx = env
        .ctx(1, ExecMode::Check)
        .with_min_gas_prices(min_prices.clone());
    env.ante()
        .handle(&mut ctx, &mut eth_transfer(&key, 0, 21_000, 1), true)
        .unwrap();
    let mut ctx = env.ctx(1, ExecMode::Deliver).with_min_gas_prices(min_prices);
    env.ante()
        .handle(&mut ctx, &mut eth_transfer(&key, 1, 21_000, 1), false)
        .unwrap();
}

#[test]
fn test_eth_insufficient_funds() {
    let env = TestEnv::new();
    let key = TestKey::new(1);
    // fee alone is 21000, the value pushes the cost over
    env.fund(&key.address(), 21_005);

    let mut ctx = env.ctx(1, ExecMode::Check);
    let err = env
        .ante()
        .handle(&mut ctx, &mut eth_transfer(&key, 0, 21_000, 1), false)
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientFunds(_)));

    // block execution only needs the fee up front
    let mut ctx = env.ctx(1, ExecMode::Deliver);
    env.ante()
        .handle(&mut ctx, &mut eth_transfer(&key, 0, 21_000, 1), false)
        .unwrap();
    assert_eq!(env.balance(&key.address()), Wei::from(5));

    let mut ctx = env.ctx(1, ExecMode::Deliver);
    let err = env
        .ante()
        .handle(&mut ctx, &mut eth_transfer(&key, 1, 21_000, 1), false)
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientFunds(_)));
}

#[test]
fn test_eth_unknown_sender() {
    let env = TestEnv::new();
    let key = TestKey::new(7);

    // block execution never creates the sender
    let mut ctx = env.ctx(1, ExecMode::Deliver);
    let err = env
        .ante()
        .handle(&mut ctx, &mut eth_transfer(&key, 0, 21_000, 1), false)
        .unwrap_err();
    assert!(matches!(err, Error::UnknownAddress(_)));
    assert!(env.ak.get_account(&env.store, &key.address()).is_none());

    // admission creates it, then finds it cannot pay
    let mut ctx = env.ctx(1, ExecMode::Check);
    let err = env
        .ante()
        .handle(&mut ctx, &mut eth_transfer(&key, 0, 21_000, 1), false)
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientFunds(_)));
    assert!(env.ak.get_account(&env.store, &key.address()).is_some());
}

#[test]
fn test_std_send() {
    let env = TestEnv::new();
    let key = TestKey::new(1);
    let from = key.address();
    env.fund(&from, 1_000_000);

    let send = StdMsg::Send(MsgSend {
        from: from.clone(),
        to: recipient(),
        amount: coins(100),
    });
    let tx = std_tx(
        &env.store,
        env.ak.as_ref(),
        evmhost_tools::CHAIN_ID,
        vec![send.clone()],
        coins(500),
        200_000,
        "hi",
        &[&key],
    );

    let mut ctx = env.ctx(1, ExecMode::Deliver);
    env.ante()
        .handle(&mut ctx, &mut Tx::Std(tx.clone()), false)
        .unwrap();
    let acc = env.ak.get_account(&env.store, &from).unwrap();
    assert_eq!(acc.sequence, 1);
    assert_eq!(acc.pub_key(), Some(&key.pub_key()));
    assert_eq!(env.balance(&from), Wei::from(1_000_000 - 500));
    assert_eq!(env.balance(&fee_collector()), Wei::from(500));
    let size_gas = tx.size() as u64 * 10;
    assert_eq!(ctx.gas_meter().gas_consumed(), size_gas + 21_000);

    // the old signature no longer matches the sequence
    let mut ctx = env.ctx(1, ExecMode::Deliver);
    let err = env
        .ante()
        .handle(&mut ctx, &mut Tx::Std(tx.clone()), false)
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));

    // but a re-admission pass does not check signatures
    let mut ctx = env.ctx(1, ExecMode::ReCheck);
    env.ante()
        .handle(&mut ctx, &mut Tx::Std(tx), false)
        .unwrap();
    assert_eq!(env.ak.get_account(&env.store, &from).unwrap().sequence, 2);
}

#[test]
fn test_std_rejections() {
    let env = TestEnv::new();
    let key = TestKey::new(1);
    let from = key.address();
    env.fund(&from, 1_000_000);
    let send = StdMsg::Send(MsgSend {
        from: from.clone(),
        to: recipient(),
        amount: coins(100),
    });
    let build = |fee: u64, gas: u64, memo: &str| {
        Tx::Std(std_tx(
            &env.store,
            env.ak.as_ref(),
            evmhost_tools::CHAIN_ID,
            vec![send.clone()],
            coins(fee),
            gas,
            memo,
            &[&key],
        ))
    };

    let mut ctx = env.ctx(1, ExecMode::Deliver);
    let err = env
        .ante()
        .handle(&mut ctx, &mut build(500, 200_000, &"x".repeat(300)), false)
        .unwrap_err();
    assert_eq!(err, Error::MemoTooLarge { len: 300, max: 256 });

    // size gas alone exceeds the limit
    let mut ctx = env.ctx(1, ExecMode::Deliver);
    let err = env
        .ante()
        .handle(&mut ctx, &mut build(500, 100, ""), false)
        .unwrap_err();
    assert!(matches!(err, Error::OutOfGas { gas_wanted: 100, .. }));
    assert_eq!(err.kind(), ErrorKind::OutOfGas);

    let mut ctx = env
        .ctx(1, ExecMode::Check)
        .with_min_gas_prices(vec![Coin::new(DENOM, Wei::from(1))]);
    let err = env
        .ante()
        .handle(&mut ctx, &mut build(500, 200_000, ""), false)
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientFee(_)));

    let mut ctx = env.ctx(1, ExecMode::Deliver);
    let err = env
        .ante()
        .handle(&mut ctx, &mut build(2_000_000, 200_000, ""), false)
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientFunds(_)));

    assert_eq!(env.ak.get_account(&env.store, &from).unwrap().sequence, 0);
}
