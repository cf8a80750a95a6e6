use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "ferrocoin")]
pub struct Opt {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "createblockchain", about = "Create a new blockchain")]
    Createblockchain {
        #[arg(help = "The address the genesis block reward goes to")]
        address: String,
        #[arg(help = "Text embedded in the genesis coinbase", default_value = "")]
        data: String,
    },
    #[command(name = "createwallet", about = "Create a new wallet")]
    Createwallet,
    #[command(name = "listaddresses", about = "Print local wallet addresses")]
    ListAddresses,
    #[command(name = "getbalance", about = "Get the balance of an address")]
    GetBalance {
        #[arg(help = "The wallet address")]
        address: String,
    },
    #[command(name = "getbalances", about = "Get balances of all local wallets")]
    GetBalances,
    #[command(name = "send", about = "Send coins between addresses")]
    Send {
        #[arg(help = "Source wallet address")]
        from: String,
        #[arg(help = "Destination address")]
        to: String,
        #[arg(help = "Amount to send, in coins")]
        amount: f64,
    },
    #[command(name = "makeblock", about = "Mint a block from pooled transactions")]
    MakeBlock,
    #[command(name = "dropblock", about = "Remove the top block of the primary branch")]
    DropBlock,
    #[command(name = "printchain", about = "Print all blocks of the primary branch")]
    Printchain,
    #[command(name = "reindexcache", about = "Rebuild transaction and unspent caches")]
    Reindexcache,
    #[command(
        name = "unapprovedtransactions",
        about = "List transactions waiting in the pool"
    )]
    UnapprovedTransactions,
    #[command(name = "canceltransaction", about = "Remove a transaction from the pool")]
    CancelTransaction {
        #[arg(help = "Transaction id, hex encoded")]
        txid: String,
    },
    #[command(name = "showunspent", about = "List unspent outputs of an address")]
    ShowUnspent {
        #[arg(help = "The wallet address")]
        address: String,
    },
    #[command(name = "addrhistory", about = "Show the transfer history of an address")]
    AddrHistory {
        #[arg(help = "The wallet address")]
        address: String,
    },
    #[command(name = "nodestate", about = "Show a summary of the chain state")]
    NodeState,
}
