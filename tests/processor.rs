use evmhost::auth::fee_collector;
use evmhost::common::{Addr, Bloom, Bytes, NullableAddr, Wei};
use evmhost::config::Config;
use evmhost::context::Header;
use evmhost::error::Error;
use evmhost::genesis::{GenesisAccount, GenesisState};
use evmhost::handler::EVENT_TYPE_TRANSFER;
use evmhost::processor::BlockProcessor;
use evmhost::state_transition::{decode_result_data, EVENT_TYPE_ETHEREUM_TX};
use evmhost::tx::{MsgEthermint, MsgSend, StdMsg, Tx};
use evmhost_tools::dummy::{OP_INVALID, OP_LOG, OP_RETURN};
use evmhost_tools::keys::{std_tx, TestKey};
use evmhost_tools::{block_hash, coins, config, header, processor, CHAIN_ID, EIP155_CHAIN_ID};

const FUNDS: u64 = 10_000_000;

fn setup(config: Config) -> (BlockProcessor, TestKey) {
    let key = TestKey::new(1);
    let genesis = GenesisState {
        accounts: vec![GenesisAccount {
            address: key.address(),
            balance: Wei::from(FUNDS),
            code: Bytes::empty(),
            storage: Vec::new(),
        }],
        ..Default::default()
    };
    (processor(config, &genesis), key)
}

fn recipient() -> Addr {
    Addr::from([0xbb; 20])
}

fn transfer(key: &TestKey, nonce: u64, amount: u64) -> Vec<u8> {
    Tx::Eth(key.transfer(
        EIP155_CHAIN_ID,
        nonce,
        &recipient(),
        amount.into(),
        21_000,
        1.into(),
    ))
    .encode()
}

fn balance(p: &BlockProcessor, addr: &Addr) -> Wei {
    p.querier().balance(addr, None).unwrap()
}

#[test]
fn test_block_flow() {
    let (mut p, key) = setup(config());
    let sender = key.address();

    p.begin_block(header(1)).unwrap();
    let res = p.deliver_tx(&transfer(&key, 0, 1_000));
    assert!(res.is_ok(), "{}", res.log);
    assert_eq!(res.gas_wanted, 21_000);
    assert_eq!(res.gas_used, 21_000);
    assert!(res.events.iter().any(|e| e.ty == EVENT_TYPE_ETHEREUM_TX &&
        e.get("recipient") == Some(recipient().to_hex().as_str())));

    // deploy a logging contract, then call it
    let deploy = Tx::Eth(key.deploy(
        EIP155_CHAIN_ID,
        1,
        vec![OP_LOG, OP_RETURN].into(),
        100_000,
        1.into(),
    ));
    let res = p.deliver_tx(&deploy.encode());
    assert!(res.is_ok(), "{}", res.log);
    let contract = decode_result_data(&res.data)
        .unwrap()
        .contract_address
        .0
        .unwrap();
    let call = Tx::Eth(key.call(
        EIP155_CHAIN_ID,
        2,
        &contract,
        Bytes::from(&b"hi"[..]),
        100_000,
        1.into(),
    ));
    let res = p.deliver_tx(&call.encode());
    assert!(res.is_ok(), "{}", res.log);
    assert_eq!(decode_result_data(&res.data).unwrap().ret, Bytes::from(&b"hi"[..]));

    // nothing is visible before the commit
    assert_eq!(balance(&p, &recipient()), Wei::from(0));
    let bloom = p.end_block().unwrap();
    assert!(bloom.contains_input(contract.as_bytes()));
    let app_hash = p.commit().unwrap();
    assert!(!app_hash.is_zero());
    assert_eq!(p.last_header().height, 1);

    let fees = 21_000 + 100_000 + 100_000;
    let q = p.querier();
    assert_eq!(q.block_number(), 1);
    assert_eq!(balance(&p, &recipient()), Wei::from(1_000));
    assert_eq!(balance(&p, &sender), Wei::from(FUNDS - 1_000 - fees));
    assert_eq!(balance(&p, &fee_collector()), Wei::from(fees));
    assert_eq!(q.nonce(&sender, None).unwrap(), 3);
    assert_eq!(q.code(&contract, None).unwrap(), Bytes::from(vec![OP_LOG, OP_RETURN]));
    let logs = q.tx_logs(&call.hash()).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].tx_index, 2);
    assert_eq!(q.block_logs(&header(1).hash).unwrap(), logs);
    assert_eq!(q.logs_bloom(1).unwrap(), bloom);

    // the next block records the hash of this one
    p.begin_block(header(2)).unwrap();
    p.end_block().unwrap();
    let app_hash2 = p.commit().unwrap();
    assert_ne!(app_hash2, app_hash);
    assert_eq!(p.querier().hash_to_height(&block_hash(1)).unwrap(), 1);
    assert_eq!(p.querier().logs_bloom(2).unwrap(), Bloom::default());
}

#[test]
fn test_failed_execution_keeps_fee() {
    let (mut p, key) = setup(config());
    let sender = key.address();
    p.begin_block(header(1)).unwrap();
    let deploy = Tx::Eth(key.deploy(
        EIP155_CHAIN_ID,
        0,
        vec![OP_INVALID].into(),
        100_000,
        1.into(),
    ));
    let res = p.deliver_tx(&deploy.encode());
    let contract = decode_result_data(&res.data)
        .unwrap()
        .contract_address
        .0
        .unwrap();

    let call = Tx::Eth(key.call(
        EIP155_CHAIN_ID,
        1,
        &contract,
        Bytes::empty(),
        50_000,
        1.into(),
    ));
    let res = p.deliver_tx(&call.encode());
    assert_eq!(res.code, 101);
    assert!(matches!(res.error, Some(Error::Vm(_))));
    assert_eq!(res.gas_used, 50_000);
    assert!(res.events.is_empty());
    p.end_block().unwrap();
    p.commit().unwrap();

    // fee and sequence survive, nothing else does
    assert_eq!(balance(&p, &sender), Wei::from(FUNDS - 100_000 - 50_000));
    assert_eq!(p.querier().nonce(&sender, None).unwrap(), 2);
    assert!(p.querier().tx_logs(&call.hash()).is_err());
}

#[test]
fn test_rejected_tx_changes_nothing() {
    let (mut p, key) = setup(config());
    p.begin_block(header(1)).unwrap();
    let res = p.deliver_tx(&transfer(&key, 7, 1));
    assert_eq!(res.code, 7);
    assert_eq!(res.gas_used, 0);
    let res = p.deliver_tx(b"\x01\x02");
    assert!(!res.is_ok());
    p.end_block().unwrap();
    p.commit().unwrap();
    assert_eq!(balance(&p, &key.address()), Wei::from(FUNDS));
    assert_eq!(p.querier().nonce(&key.address(), None).unwrap(), 0);
}

#[test]
fn test_check_tx() {
    let (mut p, key) = setup(config());
    let res = p.check_tx(&transfer(&key, 0, 1_000), false);
    assert!(res.is_ok(), "{}", res.log);
    // admission never touches committed state
    assert_eq!(balance(&p, &key.address()), Wei::from(FUNDS));
    assert_eq!(balance(&p, &recipient()), Wei::from(0));

    let res = p.check_tx(&transfer(&key, 3, 1_000), false);
    assert_eq!(res.code, 7);

    // the check state remembers the fees charged so far
    let (mut p, key) = setup(config());
    let big = FUNDS - 21_000 - 10;
    assert!(p.check_tx(&transfer(&key, 0, big), false).is_ok());
    let res = p.check_tx(&transfer(&key, 0, big), false);
    assert!(matches!(res.error, Some(Error::InsufficientFunds(_))));

    // and forgets them at the commit
    p.begin_block(header(1)).unwrap();
    p.end_block().unwrap();
    p.commit().unwrap();
    assert!(p.check_tx(&transfer(&key, 0, big), false).is_ok());
    // re-admission runs against the fresh check state as well
    assert!(p.check_tx(&transfer(&key, 0, 1), true).is_ok());
}

#[test]
fn test_check_tx_min_gas_price() {
    let (mut p, key) = setup(Config {
        minimum_gas_prices: "2aphoton".into(),
        ..config()
    });
    let res = p.check_tx(&transfer(&key, 0, 1), false);
    assert_eq!(res.code, 13);

    // the floor is local to admission
    p.begin_block(header(1)).unwrap();
    assert!(p.deliver_tx(&transfer(&key, 0, 1)).is_ok());
}

#[test]
fn test_simulate_tx() {
    let (mut p, key) = setup(config());
    let res = p.simulate_tx(&transfer(&key, 0, 1_000));
    assert!(res.is_ok(), "{}", res.log);
    assert_eq!(res.gas_used, 21_000);
    // neither the check state nor the root changed
    assert!(p.simulate_tx(&transfer(&key, 0, 1_000)).is_ok());
    assert!(p.check_tx(&transfer(&key, 0, 1_000), false).is_ok());
    assert_eq!(balance(&p, &key.address()), Wei::from(FUNDS));
}

#[test]
fn test_std_messages() {
    let (mut p, key) = setup(config());
    let sender = key.address();
    let store = p.root_store();
    let ak = p.keeper().account_keeper().clone();
    let send = StdMsg::Send(MsgSend {
        from: sender.clone(),
        to: recipient(),
        amount: coins(700),
    });
    let evm = StdMsg::Ethermint(MsgEthermint {
        account_nonce: 1,
        price: 1.into(),
        gas_limit: 100_000,
        recipient: NullableAddr(Some(Addr::from([0xcc; 20]))),
        amount: 300.into(),
        payload: Bytes::empty(),
        from: sender.clone(),
    });
    let tx = std_tx(
        &store,
        ak.as_ref(),
        CHAIN_ID,
        vec![send, evm],
        coins(1_000),
        200_000,
        "",
        &[&key],
    );

    // an ethereum message may not ride along with others in the mempool
    let res = p.check_tx(&Tx::Std(tx.clone()).encode(), false);
    assert_eq!(res.code, 3);

    p.begin_block(header(1)).unwrap();
    let res = p.deliver_tx(&Tx::Std(tx).encode());
    assert!(res.is_ok(), "{}", res.log);
    assert!(res.events.iter().any(|e| e.ty == EVENT_TYPE_TRANSFER &&
        e.get("amount") == Some("700aphoton")));
    p.end_block().unwrap();
    p.commit().unwrap();

    assert_eq!(balance(&p, &recipient()), Wei::from(700));
    assert_eq!(balance(&p, &Addr::from([0xcc; 20])), Wei::from(300));
    assert_eq!(balance(&p, &sender), Wei::from(FUNDS - 1_000 - 700 - 300));
    assert_eq!(p.querier().nonce(&sender, None).unwrap(), 1);
}

#[test]
fn test_ethermint_gas_bounded_by_fee() {
    let (mut p, key) = setup(config());
    let sender = key.address();
    p.begin_block(header(1)).unwrap();
    let deploy = Tx::Eth(key.deploy(
        EIP155_CHAIN_ID,
        0,
        vec![OP_INVALID].into(),
        100_000,
        1.into(),
    ));
    let res = p.deliver_tx(&deploy.encode());
    let contract = decode_result_data(&res.data)
        .unwrap()
        .contract_address
        .0
        .unwrap();
    p.end_block().unwrap();
    p.commit().unwrap();
    let funds = balance(&p, &sender);

    let store = p.root_store();
    let ak = p.keeper().account_keeper().clone();
    let msg = |gas_limit: u64| {
        StdMsg::Ethermint(MsgEthermint {
            account_nonce: 1,
            price: 1.into(),
            gas_limit,
            recipient: NullableAddr(Some(contract.clone())),
            amount: 0.into(),
            payload: Bytes::empty(),
            from: sender.clone(),
        })
    };

    // a message asking for more gas than the fee pays for is malformed
    let greedy = std_tx(
        &store,
        ak.as_ref(),
        CHAIN_ID,
        vec![msg(200_000)],
        coins(60_000),
        60_000,
        "",
        &[&key],
    );
    let res = p.check_tx(&Tx::Std(greedy.clone()).encode(), false);
    assert_eq!(res.code, 3);
    p.begin_block(header(2)).unwrap();
    let res = p.deliver_tx(&Tx::Std(greedy).encode());
    assert_eq!(res.code, 3);
    p.end_block().unwrap();
    p.commit().unwrap();
    assert_eq!(balance(&p, &sender), funds);

    // the dry run in admission prices the call on top of the signature
    // gas, overrunning the fee's meter; the signal leaves typed
    let tx = std_tx(
        &store,
        ak.as_ref(),
        CHAIN_ID,
        vec![msg(60_000)],
        coins(60_000),
        60_000,
        "",
        &[&key],
    );
    let res = p.check_tx(&Tx::Std(tx).encode(), false);
    assert_eq!(res.code, 11);
    match res.error {
        Some(Error::OutOfGas {
            gas_wanted,
            gas_used,
            ..
        }) => {
            assert_eq!(gas_wanted, 60_000);
            assert_eq!(gas_used, 60_000);
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_block_gas_limit() {
    let (mut p, key) = setup(Config {
        block_gas_limit: 30_000,
        ..config()
    });
    p.begin_block(header(1)).unwrap();
    assert!(p.deliver_tx(&transfer(&key, 0, 1)).is_ok());
    // the second transaction still starts, and exhausts the block
    assert!(p.deliver_tx(&transfer(&key, 1, 1)).is_ok());
    let res = p.deliver_tx(&transfer(&key, 2, 1));
    assert_eq!(res.code, 11);
    assert_eq!(res.gas_used, 0);
    p.end_block().unwrap();
    p.commit().unwrap();
    assert_eq!(p.querier().nonce(&key.address(), None).unwrap(), 2);
}

#[test]
fn test_lifecycle_errors() {
    let (mut p, key) = setup(config());
    let res = p.deliver_tx(&transfer(&key, 0, 1));
    assert!(matches!(res.error, Some(Error::InvalidState(_))));
    assert!(matches!(p.end_block(), Err(Error::InvalidState(_))));
    assert!(matches!(p.commit(), Err(Error::InvalidState(_))));

    let wrong = Header {
        chain_id: "ethermint-9".into(),
        ..header(1)
    };
    assert!(matches!(p.begin_block(wrong), Err(Error::InvalidChainId(_))));

    p.begin_block(header(1)).unwrap();
    assert!(matches!(p.begin_block(header(2)), Err(Error::InvalidState(_))));
    p.end_block().unwrap();
    assert!(matches!(p.begin_block(header(2)), Err(Error::InvalidState(_))));
    p.commit().unwrap();
    p.begin_block(header(2)).unwrap();
}

#[test]
fn test_historical_queries() {
    let (mut p, key) = setup(config());
    for h in 1..=3u64 {
        p.begin_block(header(h)).unwrap();
        assert!(p.deliver_tx(&transfer(&key, h - 1, 100)).is_ok());
        p.end_block().unwrap();
        p.commit().unwrap();
    }
    let q = p.querier();
    for h in 1..=3u64 {
        assert_eq!(q.balance(&recipient(), Some(h)).unwrap(), Wei::from(100 * h));
        assert_eq!(q.nonce(&key.address(), Some(h)).unwrap(), h);
    }
    assert!(matches!(q.balance(&recipient(), Some(9)), Err(Error::BlockNotFound(_))));

    let path = format!("balance/{}", recipient().to_hex());
    let json = p.query(&path, Some(2)).unwrap();
    assert_eq!(serde_json::from_slice::<Wei>(&json).unwrap(), Wei::from(200));
    let json = p.query("blockNumber", None).unwrap();
    assert_eq!(serde_json::from_slice::<u64>(&json).unwrap(), 3);
    let json = p.query(&format!("hashToHeight/{}", block_hash(2).to_hex()), None).unwrap();
    assert_eq!(serde_json::from_slice::<u64>(&json).unwrap(), 2);
    let err = p.query("nope", None).unwrap_err();
    assert_eq!(err.code(), 6);
    let err = p.query("balance/zz", None).unwrap_err();
    assert!(matches!(err, Error::UnknownRequest(_)));
    assert!(p.query("storage/", None).is_err());
}
