use evmhost::auth::Coin;
use evmhost::common::{Addr, Bytes, Hash, Wei};
use evmhost::evm::StateDb;
use evmhost::state::CommitStateDb;
use evmhost::store::keys;
use evmhost_tools::{header, TestEnv, DENOM};

fn slot(n: u8) -> Hash {
    Hash::from([n; 32])
}

fn state_db(env: &TestEnv) -> CommitStateDb {
    let mut db = env.keeper.state_db(&env.store).unwrap();
    db.set_height(1);
    db
}

#[test]
fn test_finalize_persists_dirty_objects() {
    let env = TestEnv::new();
    let addr = Addr::from([1; 20]);
    let mut db = state_db(&env);
    db.add_balance(&addr, &Wei::from(100));
    db.set_nonce(&addr, 3);
    db.set_code(&addr, vec![0x60, 0x00].into());
    db.set_state(&addr, &slot(1), slot(2));
    // nothing reaches the store before finalizing
    assert!(env.ak.get_account(&env.store, &addr).is_none());
    assert_eq!(db.get_committed_state(&addr, &slot(1)), Hash::default());
    assert_eq!(db.get_state(&addr, &slot(1)), slot(2));

    db.finalize(true);
    assert_eq!(env.balance(&addr), Wei::from(100));
    assert_eq!(env.nonce(&addr), 3);
    assert_eq!(env.keeper.get_code(&env.store, &addr), Bytes::from(vec![0x60, 0x00]));
    assert_eq!(env.keeper.get_state(&env.store, &addr, &slot(1)), slot(2));
    assert_eq!(env.keeper.get_storage(&env.store, &addr), vec![(slot(1), slot(2))]);

    // a fresh cache reads it all back
    let mut db = state_db(&env);
    assert_eq!(db.get_balance(&addr), Wei::from(100));
    assert_eq!(db.get_code_size(&addr), 2);
    assert_eq!(db.get_code_hash(&addr), Hash::hash(&[0x60, 0x00]));
    assert_eq!(db.get_committed_state(&addr, &slot(1)), slot(2));

    // zeroing a slot removes it
    db.set_state(&addr, &slot(1), Hash::default());
    db.finalize(true);
    assert!(env.keeper.get_storage(&env.store, &addr).is_empty());
}

#[test]
fn test_nested_snapshots() {
    let env = TestEnv::new();
    let addr = Addr::from([1; 20]);
    env.fund(&addr, 1000);
    let mut db = state_db(&env);
    db.prepare(Hash::hash(b"tx"), header(1).hash, 0);

    let s0 = db.snapshot();
    db.sub_balance(&addr, &Wei::from(100));
    db.set_state(&addr, &slot(1), slot(1));
    db.add_log(&addr, vec![slot(9)], Bytes::empty());
    let s1 = db.snapshot();
    db.sub_balance(&addr, &Wei::from(200));
    db.set_state(&addr, &slot(1), slot(2));
    db.add_log(&addr, vec![slot(9)], Bytes::empty());
    db.add_refund(50);
    db.add_slot_to_access_list(&addr, &slot(1));

    db.revert_to_snapshot(s1);
    assert_eq!(db.get_balance(&addr), Wei::from(900));
    assert_eq!(db.get_state(&addr, &slot(1)), slot(1));
    assert_eq!(db.get_logs(&Hash::hash(b"tx")).len(), 1);
    assert_eq!(db.get_refund(), 0);
    assert!(!db.address_in_access_list(&addr));
    // s1 is gone, reverting to it again does nothing
    db.revert_to_snapshot(s1);
    assert_eq!(db.get_balance(&addr), Wei::from(900));

    db.revert_to_snapshot(s0);
    assert_eq!(db.get_balance(&addr), Wei::from(1000));
    assert_eq!(db.get_state(&addr, &slot(1)), Hash::default());
    assert!(db.all_logs().is_empty());

    // a later log reuses the released index
    db.add_log(&addr, vec![], Bytes::empty());
    assert_eq!(db.all_logs()[0].index, 0);
    assert_eq!(db.all_logs()[0].block_number, 1);
}

#[test]
fn test_revert_object_creation() {
    let env = TestEnv::new();
    let addr = Addr::from([1; 20]);
    let mut db = state_db(&env);
    let s = db.snapshot();
    db.create_account(&addr);
    db.add_balance(&addr, &Wei::from(5));
    assert!(db.exist(&addr));
    db.revert_to_snapshot(s);
    assert!(!db.exist(&addr));
    db.finalize(true);
    assert!(env.ak.get_account(&env.store, &addr).is_none());
}

#[test]
fn test_create_account_keeps_balance() {
    let env = TestEnv::new();
    let addr = Addr::from([1; 20]);
    env.fund(&addr, 42);
    env.set_nonce(&addr, 7);
    let mut db = state_db(&env);
    db.create_account(&addr);
    assert_eq!(db.get_balance(&addr), Wei::from(42));
    assert_eq!(db.get_nonce(&addr), 0);
}

#[test]
fn test_suicide() {
    let env = TestEnv::new();
    let addr = Addr::from([1; 20]);
    env.fund(&addr, 10);
    let mut db = state_db(&env);
    db.set_state(&addr, &slot(3), slot(4));
    db.finalize(true);

    let mut db = state_db(&env);
    assert!(!db.suicide(&Addr::from([2; 20])));
    let s = db.snapshot();
    assert!(db.suicide(&addr));
    assert!(db.has_suicided(&addr));
    assert_eq!(db.get_balance(&addr), Wei::from(0));
    db.revert_to_snapshot(s);
    assert!(!db.has_suicided(&addr));
    assert_eq!(db.get_balance(&addr), Wei::from(10));

    db.suicide(&addr);
    db.finalize(true);
    assert!(env.ak.get_account(&env.store, &addr).is_none());
    assert!(env
        .store
        .iter_prefix(&keys::storage_prefix(&addr))
        .is_empty());
}

#[test]
fn test_deletion_keeps_foreign_coins() {
    let env = TestEnv::new();
    let addr = Addr::from([1; 20]);
    env.fund(&addr, 10);
    let mut acc = env.ak.get_account(&env.store, &addr).unwrap();
    acc.coins.set_amount("stake", Wei::from(3));
    env.ak.set_account(&env.store, &acc);

    let mut db = state_db(&env);
    db.suicide(&addr);
    db.finalize(true);
    let acc = env.ak.get_account(&env.store, &addr).unwrap();
    assert_eq!(acc.balance(DENOM), Wei::from(0));
    assert_eq!(acc.coins.iter().cloned().collect::<Vec<_>>(), vec![Coin::new("stake", Wei::from(3))]);
}

#[test]
fn test_empty_accounts_pruned() {
    let env = TestEnv::new();
    let touched = Addr::from([1; 20]);
    let mut db = state_db(&env);
    db.add_balance(&touched, &Wei::from(0));
    assert!(db.empty(&touched));
    db.finalize(false);
    assert!(env.ak.get_account(&env.store, &touched).is_some());

    let mut db = state_db(&env);
    db.add_balance(&touched, &Wei::from(0));
    db.finalize(true);
    assert!(env.ak.get_account(&env.store, &touched).is_none());

    // storage keeps an otherwise empty account alive
    let mut db = state_db(&env);
    db.set_state(&touched, &slot(1), slot(1));
    db.finalize(true);
    assert!(env.ak.get_account(&env.store, &touched).is_some());
}

#[test]
fn test_copy_is_isolated() {
    let env = TestEnv::new();
    let addr = Addr::from([1; 20]);
    env.fund(&addr, 100);
    let mut db = state_db(&env);
    db.sub_balance(&addr, &Wei::from(10));

    let mut copy = db.copy();
    assert_eq!(copy.get_balance(&addr), Wei::from(90));
    copy.sub_balance(&addr, &Wei::from(50));
    assert_eq!(copy.get_balance(&addr), Wei::from(40));
    assert_eq!(db.get_balance(&addr), Wei::from(90));
    // the copy has no revisions of its own
    copy.revert_to_snapshot(0);
    assert_eq!(copy.get_balance(&addr), Wei::from(40));

    db.finalize(true);
    assert_eq!(env.balance(&addr), Wei::from(90));
}

#[test]
fn test_update_accounts_picks_up_external_writes() {
    let env = TestEnv::new();
    let addr = Addr::from([1; 20]);
    env.fund(&addr, 100);
    let mut db = state_db(&env);
    assert_eq!(db.get_balance(&addr), Wei::from(100));
    // the fee is charged behind the cache's back
    env.fund(&addr, 50);
    env.set_nonce(&addr, 4);
    assert_eq!(db.get_balance(&addr), Wei::from(100));
    db.update_accounts();
    assert_eq!(db.get_balance(&addr), Wei::from(150));
    assert_eq!(db.get_nonce(&addr), 4);
}

#[test]
fn test_preimages_and_refunds() {
    let env = TestEnv::new();
    let mut db = state_db(&env);
    let h = Hash::hash(b"pre");
    let s = db.snapshot();
    db.add_preimage(&h, b"pre");
    db.add_preimage(&h, b"ignored");
    assert_eq!(db.preimages().get(&h), Some(&Bytes::from(&b"pre"[..])));
    db.add_refund(10);
    db.sub_refund(4);
    assert_eq!(db.get_refund(), 6);
    db.sub_refund(100);
    assert_eq!(db.get_refund(), 0);
    db.revert_to_snapshot(s);
    assert!(db.preimages().is_empty());
    assert_eq!(db.get_refund(), 0);
}
