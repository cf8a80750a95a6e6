//! End-to-end tests of the chain-state engine
//!
//! Each test drives a fresh node through a real flow: genesis, transfer
//! and minting, pool admission, side branches with reorganization, and
//! dropping blocks.

use ferrocoin::core::monetary::{PAYMENT_FOR_BLOCK_MADE, UNITS_PER_COIN};
use ferrocoin::node::NodeManager;
use ferrocoin::utils::sign_data;
use ferrocoin::wallet::Wallet;
use ferrocoin::{Block, BlockAddState, ChainError, TXInput, TXOutput, Transaction};
use std::collections::HashMap;
use std::thread;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

const COIN: i64 = UNITS_PER_COIN;

struct TestNode {
    node: NodeManager,
    wallet_a: Wallet,
    address_a: String,
    _dir: TempDir,
}

// genesis paying wallet A, which is also the minter address
fn setup() -> TestNode {
    let dir = tempdir().unwrap();
    let wallet_a = Wallet::new().unwrap();
    let address_a = wallet_a.get_address();
    let node = NodeManager::create_blockchain(dir.path(), &address_a, "hello").unwrap();
    TestNode {
        node,
        wallet_a,
        address_a,
        _dir: dir,
    }
}

// a manually signed transfer spending one output of `prev_tx`
fn make_transfer(
    sender: &Wallet,
    prev_tx: &Transaction,
    out_index: i32,
    to: &str,
    amount: i64,
) -> Transaction {
    let prev_value = prev_tx.get_vout()[out_index as usize].get_value();
    let input = TXInput::new(prev_tx.get_id(), out_index, sender.get_public_key());

    let mut outputs = vec![TXOutput::new(amount, to).unwrap()];
    let change = prev_value - amount;
    if change > 0 {
        outputs.push(TXOutput::new(change, &sender.get_address()).unwrap());
    }

    let mut tx = Transaction::new_unsigned(vec![input], outputs).unwrap();
    let mut prev_txs = HashMap::new();
    prev_txs.insert(0, prev_tx.clone());

    let to_sign = tx.prepare_sign_data(&prev_txs).unwrap();
    let signatures = to_sign
        .iter()
        .map(|data| sign_data(sender.get_pkcs8(), data).unwrap())
        .collect();
    tx.set_signatures(signatures).unwrap();
    tx
}

fn genesis_coinbase(node: &NodeManager) -> Transaction {
    let first_hash = node.chain().get_first_hash().unwrap();
    let genesis = node.chain().get_block(&first_hash).unwrap().unwrap();
    genesis.get_transactions()[0].clone()
}

fn approved_balance(node: &NodeManager, address: &str) -> i64 {
    node.get_balance(address).unwrap().approved
}

#[test]
fn test_genesis_creation() {
    let t = setup();

    let top_hash = t.node.chain().get_top_hash();
    let first_hash = t.node.chain().get_first_hash().unwrap();
    assert_eq!(top_hash, first_hash);

    let state = t.node.get_node_state().unwrap();
    assert_eq!(state.height, 0);
    assert_eq!(state.blocks_total, 1);
    assert_eq!(state.unspent_outputs, 1);
    assert_eq!(state.transactions_in_pool, 0);

    assert_eq!(approved_balance(&t.node, &t.address_a), 10 * COIN);
}

#[test]
fn test_linear_extension() {
    let t = setup();
    let wallet_b = Wallet::new().unwrap();
    let address_b = wallet_b.get_address();

    t.node.send(&t.wallet_a, &address_b, 3 * COIN).unwrap();
    let minted = t.node.try_to_make_block().unwrap().expect("block expected");

    assert_eq!(t.node.chain().get_top_hash(), minted);
    assert_eq!(t.node.chain().get_best_height().unwrap(), 1);

    // 10 original - 3 sent + 10 fresh coinbase
    assert_eq!(approved_balance(&t.node, &t.address_a), 17 * COIN);
    assert_eq!(approved_balance(&t.node, &address_b), 3 * COIN);

    let state = t.node.get_node_state().unwrap();
    assert_eq!(state.unspent_outputs, 3);
    assert_eq!(state.transactions_in_pool, 0);
}

#[test]
fn test_pool_conflict() {
    let t = setup();
    let wallet_b = Wallet::new().unwrap();
    let wallet_c = Wallet::new().unwrap();

    t.node
        .send(&t.wallet_a, &wallet_b.get_address(), 3 * COIN)
        .unwrap();

    // a second spend of the same genesis output, submitted as if it came
    // from another node
    let conflicting = make_transfer(
        &t.wallet_a,
        &genesis_coinbase(&t.node),
        0,
        &wallet_c.get_address(),
        3 * COIN,
    );
    let result = t.node.receive_transaction(&conflicting);

    assert!(matches!(result, Err(ChainError::PoolConflict(_))));
    assert_eq!(t.node.get_node_state().unwrap().transactions_in_pool, 1);
}

#[test]
fn test_side_branch_reorg() {
    let t = setup();
    let wallet_b = Wallet::new().unwrap();
    let wallet_c = Wallet::new().unwrap();
    let wallet_d = Wallet::new().unwrap();
    let address_b = wallet_b.get_address();
    let address_c = wallet_c.get_address();
    let address_d = wallet_d.get_address();

    // primary: block 1 holds A->B plus a coinbase to A
    t.node.send(&t.wallet_a, &address_b, 3 * COIN).unwrap();
    let block1_hash = t.node.try_to_make_block().unwrap().unwrap();
    let tx_ab_id = {
        let block1 = t.node.chain().get_block(&block1_hash).unwrap().unwrap();
        block1.get_transactions()[1].get_id_bytes()
    };

    // side branch off genesis: different coinbase, A->D instead of A->B
    let genesis_hash = t.node.chain().get_first_hash().unwrap();
    let side_cb1 = Transaction::new_coinbase_tx(&address_c, b"side-1").unwrap();
    let tx_ad = make_transfer(
        &t.wallet_a,
        &genesis_coinbase(&t.node),
        0,
        &address_d,
        3 * COIN,
    );
    let side1 = Block::new_block(genesis_hash, &[side_cb1, tx_ad], 1).unwrap();

    assert_eq!(
        t.node.add_block(&side1).unwrap(),
        BlockAddState::AddedToParallel
    );
    // primary unchanged at the same height
    assert_eq!(t.node.chain().get_top_hash(), block1_hash);
    assert_eq!(approved_balance(&t.node, &address_b), 3 * COIN);

    // the side branch grows past the primary and takes over
    let side_cb2 = Transaction::new_coinbase_tx(&address_c, b"side-2").unwrap();
    let side2 = Block::new_block(side1.get_hash_bytes(), &[side_cb2], 2).unwrap();

    assert_eq!(
        t.node.add_block(&side2).unwrap(),
        BlockAddState::AddedToParallelTop
    );
    assert_eq!(t.node.chain().get_top_hash(), side2.get_hash_bytes());
    assert_eq!(t.node.chain().get_best_height().unwrap(), 2);

    // balances follow the new branch
    assert_eq!(approved_balance(&t.node, &t.address_a), 7 * COIN);
    assert_eq!(approved_balance(&t.node, &address_b), 0);
    assert_eq!(approved_balance(&t.node, &address_c), 20 * COIN);
    assert_eq!(approved_balance(&t.node, &address_d), 3 * COIN);

    // the displaced transfer is pending again
    let pooled = t.node.get_unapproved_transactions().unwrap();
    assert_eq!(pooled.len(), 1);
    assert_eq!(pooled[0].get_id_bytes(), tx_ab_id);

    // total unspent value equals the reward times the chain length
    let total = [&t.address_a, &address_b, &address_c, &address_d]
        .iter()
        .map(|addr| approved_balance(&t.node, addr))
        .sum::<i64>();
    assert_eq!(total, PAYMENT_FOR_BLOCK_MADE * 3);
}

#[test]
fn test_drop_block() {
    let t = setup();
    let wallet_b = Wallet::new().unwrap();
    let address_b = wallet_b.get_address();

    t.node.send(&t.wallet_a, &address_b, 3 * COIN).unwrap();
    let block1_hash = t.node.try_to_make_block().unwrap().unwrap();

    let dropped = t.node.drop_block().unwrap();
    assert_eq!(dropped.get_hash_bytes(), block1_hash);

    let genesis_hash = t.node.chain().get_first_hash().unwrap();
    assert_eq!(t.node.chain().get_top_hash(), genesis_hash);

    assert_eq!(approved_balance(&t.node, &t.address_a), 10 * COIN);
    assert_eq!(approved_balance(&t.node, &address_b), 0);

    // the transfer is back in the pool, the coinbase is gone for good
    assert_eq!(t.node.get_node_state().unwrap().transactions_in_pool, 1);

    // dropping the genesis block is refused
    assert!(t.node.drop_block().is_err());
}

#[test]
fn test_bad_signature_rejected() {
    let t = setup();
    let wallet_c = Wallet::new().unwrap();

    // signed against a doctored previous transaction, so the message
    // embeds the wrong output owner hash
    let genesis_cb = genesis_coinbase(&t.node);
    let wrong_prev = Transaction::new_coinbase_tx(&wallet_c.get_address(), b"wrong").unwrap();

    let input = TXInput::new(genesis_cb.get_id(), 0, t.wallet_a.get_public_key());
    let output = TXOutput::new(PAYMENT_FOR_BLOCK_MADE, &wallet_c.get_address()).unwrap();
    let mut tx = Transaction::new_unsigned(vec![input], vec![output]).unwrap();

    let mut prev_txs = HashMap::new();
    prev_txs.insert(0, wrong_prev);
    let to_sign = tx.prepare_sign_data(&prev_txs).unwrap();
    let signatures = to_sign
        .iter()
        .map(|data| sign_data(t.wallet_a.get_pkcs8(), data).unwrap())
        .collect();
    tx.set_signatures(signatures).unwrap();

    let result = t.node.receive_transaction(&tx);
    assert!(matches!(result, Err(ChainError::VerifyFailed(_))));
    assert_eq!(t.node.get_node_state().unwrap().transactions_in_pool, 0);
}

#[test]
fn test_spending_pending_outputs() {
    let t = setup();
    let wallet_b = Wallet::new().unwrap();
    let wallet_c = Wallet::new().unwrap();

    // the second transfer can only be funded by the change of the first,
    // which is still in the pool
    t.node
        .send(&t.wallet_a, &wallet_b.get_address(), 3 * COIN)
        .unwrap();
    // the second transfer must carry a later timestamp so block assembly
    // places it after the one funding it
    thread::sleep(Duration::from_millis(2));
    t.node
        .send(&t.wallet_a, &wallet_c.get_address(), 5 * COIN)
        .unwrap();
    assert_eq!(t.node.get_node_state().unwrap().transactions_in_pool, 2);

    // both land in the same block
    let minted = t.node.try_to_make_block().unwrap().unwrap();
    let block = t.node.chain().get_block(&minted).unwrap().unwrap();
    assert_eq!(block.get_transactions().len(), 3);

    assert_eq!(approved_balance(&t.node, &wallet_b.get_address()), 3 * COIN);
    assert_eq!(approved_balance(&t.node, &wallet_c.get_address()), 5 * COIN);
    assert_eq!(approved_balance(&t.node, &t.address_a), 12 * COIN);
    assert_eq!(t.node.get_node_state().unwrap().transactions_in_pool, 0);
}

#[test]
fn test_insufficient_funds() {
    let t = setup();
    let wallet_b = Wallet::new().unwrap();

    let result = t.node.send(&t.wallet_a, &wallet_b.get_address(), 11 * COIN);
    assert!(matches!(
        result,
        Err(ChainError::InsufficientFunds { .. })
    ));
    assert_eq!(t.node.get_node_state().unwrap().transactions_in_pool, 0);
}

#[test]
fn test_reorg_involution() {
    let t = setup();
    let wallet_b = Wallet::new().unwrap();
    let wallet_c = Wallet::new().unwrap();
    let address_b = wallet_b.get_address();
    let address_c = wallet_c.get_address();

    t.node.send(&t.wallet_a, &address_b, 3 * COIN).unwrap();
    let block1_hash = t.node.try_to_make_block().unwrap().unwrap();
    let block1 = t.node.chain().get_block(&block1_hash).unwrap().unwrap();

    // reorg away to a two-block side branch
    let genesis_hash = t.node.chain().get_first_hash().unwrap();
    let side_cb1 = Transaction::new_coinbase_tx(&address_c, b"side-1").unwrap();
    let side1 = Block::new_block(genesis_hash, &[side_cb1], 1).unwrap();
    t.node.add_block(&side1).unwrap();
    let side_cb2 = Transaction::new_coinbase_tx(&address_c, b"side-2").unwrap();
    let side2 = Block::new_block(side1.get_hash_bytes(), &[side_cb2], 2).unwrap();
    assert_eq!(
        t.node.add_block(&side2).unwrap(),
        BlockAddState::AddedToParallelTop
    );
    assert_eq!(approved_balance(&t.node, &address_b), 0);

    // now grow the original branch back past the side branch
    let cb2 = Transaction::new_coinbase_tx(&address_c, b"main-2").unwrap();
    let main2 = Block::new_block(block1.get_hash_bytes(), &[cb2], 2).unwrap();
    assert_eq!(
        t.node.add_block(&main2).unwrap(),
        BlockAddState::AddedToParallel
    );
    let cb3 = Transaction::new_coinbase_tx(&address_c, b"main-3").unwrap();
    let main3 = Block::new_block(main2.get_hash_bytes(), &[cb3], 3).unwrap();
    assert_eq!(
        t.node.add_block(&main3).unwrap(),
        BlockAddState::AddedToParallelTop
    );

    // block 1 is primary again and its effects are restored
    assert_eq!(t.node.chain().get_top_hash(), main3.get_hash_bytes());
    assert_eq!(approved_balance(&t.node, &t.address_a), 17 * COIN);
    assert_eq!(approved_balance(&t.node, &address_b), 3 * COIN);
    assert_eq!(approved_balance(&t.node, &address_c), 20 * COIN);

    let total = [&t.address_a, &address_b, &address_c]
        .iter()
        .map(|addr| approved_balance(&t.node, addr))
        .sum::<i64>();
    assert_eq!(total, PAYMENT_FOR_BLOCK_MADE * 4);
}

#[test]
fn test_persistence_across_reopen() {
    let dir = tempdir().unwrap();
    let wallet_a = Wallet::new().unwrap();
    let address_a = wallet_a.get_address();
    let wallet_b = Wallet::new().unwrap();

    let top_hash;
    {
        let node = NodeManager::create_blockchain(dir.path(), &address_a, "persist").unwrap();
        node.send(&wallet_a, &wallet_b.get_address(), 2 * COIN).unwrap();
        top_hash = node.try_to_make_block().unwrap().unwrap();
    }

    let node = NodeManager::open(dir.path(), &address_a).unwrap();
    assert_eq!(node.chain().get_top_hash(), top_hash);
    assert_eq!(node.chain().get_best_height().unwrap(), 1);
    assert_eq!(approved_balance(&node, &wallet_b.get_address()), 2 * COIN);
}

#[test]
fn test_reindex_matches_incremental_state() {
    let t = setup();
    let wallet_b = Wallet::new().unwrap();

    t.node
        .send(&t.wallet_a, &wallet_b.get_address(), 4 * COIN)
        .unwrap();
    t.node.try_to_make_block().unwrap().unwrap();

    let before_a = approved_balance(&t.node, &t.address_a);
    let before_b = approved_balance(&t.node, &wallet_b.get_address());
    let before_outputs = t.node.get_node_state().unwrap().unspent_outputs;

    t.node.reindex_cache().unwrap();

    assert_eq!(approved_balance(&t.node, &t.address_a), before_a);
    assert_eq!(
        approved_balance(&t.node, &wallet_b.get_address()),
        before_b
    );
    assert_eq!(
        t.node.get_node_state().unwrap().unspent_outputs,
        before_outputs
    );
}

#[test]
fn test_address_history() {
    let t = setup();
    let wallet_b = Wallet::new().unwrap();
    let address_b = wallet_b.get_address();

    t.node.send(&t.wallet_a, &address_b, 3 * COIN).unwrap();
    t.node.try_to_make_block().unwrap().unwrap();

    let history_b = t.node.get_address_history(&address_b).unwrap();
    assert_eq!(history_b.len(), 1);
    assert!(history_b[0].income);
    assert_eq!(history_b[0].amount, 3 * COIN);
    assert_eq!(history_b[0].counterpart, t.address_a);

    let history_a = t.node.get_address_history(&t.address_a).unwrap();
    // two coinbase rewards in, one payment out
    let incomes = history_a.iter().filter(|r| r.income).count();
    let outgoing: Vec<_> = history_a.iter().filter(|r| !r.income).collect();
    assert_eq!(incomes, 2);
    assert_eq!(outgoing.len(), 1);
    assert_eq!(outgoing[0].amount, 3 * COIN);
    assert_eq!(outgoing[0].counterpart, address_b);
}

#[test]
fn test_cancel_transaction() {
    let t = setup();
    let wallet_b = Wallet::new().unwrap();

    let txid = t
        .node
        .send(&t.wallet_a, &wallet_b.get_address(), COIN)
        .unwrap();
    assert_eq!(t.node.get_node_state().unwrap().transactions_in_pool, 1);

    t.node.cancel_transaction(&txid).unwrap();
    assert_eq!(t.node.get_node_state().unwrap().transactions_in_pool, 0);

    assert!(matches!(
        t.node.cancel_transaction(&txid),
        Err(ChainError::NotFound(_))
    ));
}
