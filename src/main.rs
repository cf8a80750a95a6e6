use clap::Parser;
use data_encoding::HEXLOWER;
use ferrocoin::core::monetary::conversions::{coins_to_units, format_units};
use ferrocoin::node::NodeManager;
use ferrocoin::wallet::{validate_address, Wallets};
use ferrocoin::{Command, Opt, GLOBAL_CONFIG};
use log::{error, LevelFilter};
use std::path::PathBuf;
use std::process;

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();
    if let Err(e) = run_command(opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

// The chain database and the wallet file share one data directory.
fn data_dir() -> PathBuf {
    PathBuf::from(GLOBAL_CONFIG.get_data_dir())
}

fn chain_db_path() -> PathBuf {
    data_dir().join("chaindata")
}

fn open_wallets() -> Result<Wallets, Box<dyn std::error::Error>> {
    Ok(Wallets::open(data_dir().as_path())?)
}

// The minting address comes from the configuration when set, otherwise
// any local wallet will do for commands that never mint.
fn open_node() -> Result<NodeManager, Box<dyn std::error::Error>> {
    let minter = GLOBAL_CONFIG
        .get_minting_addr()
        .or_else(|| {
            open_wallets()
                .ok()
                .and_then(|wallets| wallets.get_addresses().into_iter().next())
        })
        .unwrap_or_default();
    Ok(NodeManager::open(&chain_db_path(), &minter)?)
}

fn run_command(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Createblockchain { address, data } => {
            if !validate_address(&address) {
                return Err(format!("Invalid address: {address}").into());
            }
            NodeManager::create_blockchain(&chain_db_path(), &address, &data)?;
            println!("Done!");
        }
        Command::Createwallet => {
            let mut wallets = open_wallets()?;
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}");
        }
        Command::ListAddresses => {
            let wallets = open_wallets()?;
            for address in wallets.get_addresses() {
                println!("{address}");
            }
        }
        Command::GetBalance { address } => {
            if !validate_address(&address) {
                return Err(format!("Invalid address: {address}").into());
            }
            let node = open_node()?;
            let balance = node.get_balance(&address)?;
            println!(
                "Balance of {address}: {} (approved {}, pending {})",
                format_units(balance.total),
                format_units(balance.approved),
                format_units(balance.pending)
            );
        }
        Command::GetBalances => {
            let node = open_node()?;
            for address in open_wallets()?.get_addresses() {
                let balance = node.get_balance(&address)?;
                println!("{address}: {}", format_units(balance.total));
            }
        }
        Command::Send { from, to, amount } => {
            if !validate_address(&from) {
                return Err(format!("Invalid sender address: {from}").into());
            }
            if !validate_address(&to) {
                return Err(format!("Invalid recipient address: {to}").into());
            }
            let units = coins_to_units(amount);
            if units <= 0 {
                return Err("Amount must be positive".into());
            }

            let wallets = open_wallets()?;
            let wallet = wallets
                .get_wallet(&from)
                .ok_or_else(|| format!("No local wallet for address: {from}"))?;

            let node = open_node()?;
            let txid = node.send(wallet, &to, units)?;
            println!("Sent. Transaction: {}", HEXLOWER.encode(&txid));
        }
        Command::MakeBlock => {
            let node = open_node()?;
            match node.try_to_make_block()? {
                Some(hash) => println!("Minted block {}", HEXLOWER.encode(&hash)),
                None => println!("No transactions ready for a block"),
            }
        }
        Command::DropBlock => {
            let node = open_node()?;
            let block = node.drop_block()?;
            println!(
                "Dropped block {} at height {}",
                HEXLOWER.encode(block.get_hash()),
                block.get_height()
            );
        }
        Command::Printchain => {
            let node = open_node()?;
            for block in node.chain().iterator() {
                println!("Block {}", HEXLOWER.encode(block.get_hash()));
                println!("  Height: {}", block.get_height());
                println!("  Prev:   {}", HEXLOWER.encode(block.get_pre_block_hash()));
                println!("  Time:   {}", block.get_timestamp());
                for tx in block.get_transactions() {
                    print!("{tx}");
                }
                println!();
            }
        }
        Command::Reindexcache => {
            let node = open_node()?;
            let count = node.reindex_cache()?;
            println!("Done! There are {count} transactions in the unspent cache.");
        }
        Command::UnapprovedTransactions => {
            let node = open_node()?;
            let txs = node.get_unapproved_transactions()?;
            for tx in &txs {
                print!("{tx}");
            }
            println!("Total: {}", txs.len());
        }
        Command::CancelTransaction { txid } => {
            let node = open_node()?;
            let txid = HEXLOWER
                .decode(txid.as_bytes())
                .map_err(|e| format!("Invalid transaction id: {e}"))?;
            node.cancel_transaction(&txid)?;
            println!("Done!");
        }
        Command::ShowUnspent { address } => {
            let node = open_node()?;
            let mut total = 0;
            for output in node.get_unspent_outputs(&address)? {
                total += output.value;
                println!(
                    "{}:{} {}",
                    HEXLOWER.encode(&output.txid),
                    output.out_index,
                    format_units(output.value)
                );
            }
            println!("Total: {}", format_units(total));
        }
        Command::AddrHistory { address } => {
            let node = open_node()?;
            for record in node.get_address_history(&address)? {
                let direction = if record.income { "IN " } else { "OUT" };
                let counterpart = if record.counterpart.is_empty() {
                    "minted".to_string()
                } else {
                    record.counterpart.clone()
                };
                println!(
                    "{direction} {} {counterpart} ({})",
                    format_units(record.amount),
                    HEXLOWER.encode(&record.txid)
                );
            }
        }
        Command::NodeState => {
            let node = open_node()?;
            let state = node.get_node_state()?;
            println!("Height:               {}", state.height);
            println!("Blocks stored:        {}", state.blocks_total);
            println!("Pool transactions:    {}", state.transactions_in_pool);
            println!("Unspent outputs:      {}", state.unspent_outputs);
        }
    }
    Ok(())
}
