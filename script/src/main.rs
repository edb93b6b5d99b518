//! Witness generation CLI for the private two-account transfer circuit.
//!
//! Subcommands:
//!   generate - build a transfer witness from a request file and an amount
//!   keys     - print the public keys derived from the request seeds
//!   check    - re-verify an emitted witness record

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs;

use transfer_witness_lib::{build_witness, verify_record, Account, Keypair, Mimc7, WitnessRecord};

#[derive(Parser)]
#[command(name = "transfer-witness")]
#[command(about = "Witness generation for the private two-account transfer circuit")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a transfer witness and write it as JSON
    Generate {
        /// Path to a JSON transfer request (key seeds and starting balances)
        #[arg(long)]
        input: String,
        /// Amount to transfer from sender to receiver
        #[arg(long)]
        amount: u64,
        /// Path to write the witness record JSON
        #[arg(long)]
        output: String,
    },
    /// Print the public keys derived from the request seeds
    Keys {
        /// Path to a JSON transfer request
        #[arg(long)]
        input: String,
    },
    /// Re-verify an emitted witness record
    Check {
        /// Path to a witness record JSON
        #[arg(long)]
        input: String,
    },
}

/// Account setup for one transfer: two 32-byte key seeds (hex) and the
/// starting balances. The amount is injected on the command line.
#[derive(Deserialize)]
struct TransferRequest {
    sender_seed: String,
    receiver_seed: String,
    sender_balance: u64,
    receiver_balance: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let hasher = Mimc7::new();

    match cli.command {
        Commands::Generate {
            input,
            amount,
            output,
        } => generate(&hasher, &input, amount, &output),
        Commands::Keys { input } => keys(&hasher, &input),
        Commands::Check { input } => check(&hasher, &input),
    }
}

fn load_request(path: &str) -> Result<TransferRequest> {
    let json = fs::read_to_string(path).with_context(|| format!("reading request {path}"))?;
    serde_json::from_str(&json).with_context(|| format!("parsing request {path}"))
}

fn decode_seed(name: &str, seed: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(seed.trim_start_matches("0x"))
        .with_context(|| format!("{name} seed is not valid hex"))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("{name} seed must be exactly 32 bytes"))
}

fn derive_keys(hasher: &Mimc7, request: &TransferRequest) -> Result<(Keypair, Keypair)> {
    let sender = Keypair::from_seed(hasher, &decode_seed("sender", &request.sender_seed)?)?;
    let receiver = Keypair::from_seed(hasher, &decode_seed("receiver", &request.receiver_seed)?)?;
    Ok((sender, receiver))
}

fn generate(hasher: &Mimc7, input: &str, amount: u64, output: &str) -> Result<()> {
    let request = load_request(input)?;
    let (sender_key, receiver_key) = derive_keys(hasher, &request)?;

    let sender = Account {
        public_key: sender_key.public,
        balance: request.sender_balance,
    };
    let receiver = Account {
        public_key: receiver_key.public,
        balance: request.receiver_balance,
    };
    println!("[generate] Sender balance: {}", sender.balance);
    println!("[generate] Receiver balance: {}", receiver.balance);
    println!("[generate] Transfer amount: {amount}");

    let witness = build_witness(hasher, &sender_key, &sender, &receiver, amount)?;
    println!("[generate] Accounts root: {}", witness.old_root);
    println!("[generate] New root: {}", witness.new_root);

    // Re-verify the record from its serialized fields before handing it out,
    // the same way a proof is verified locally before submission.
    let record = witness.to_record();
    verify_record(hasher, &record)?;
    println!("[generate] Witness record verified");

    fs::write(output, serde_json::to_string_pretty(&record)?)
        .with_context(|| format!("writing witness {output}"))?;
    println!("[generate] Witness written to {output}");

    Ok(())
}

fn keys(hasher: &Mimc7, input: &str) -> Result<()> {
    let request = load_request(input)?;
    let (sender_key, receiver_key) = derive_keys(hasher, &request)?;

    println!(
        "[keys] Sender pubkey:   ({}, {})",
        sender_key.public.x, sender_key.public.y
    );
    println!(
        "[keys] Receiver pubkey: ({}, {})",
        receiver_key.public.x, receiver_key.public.y
    );

    Ok(())
}

fn check(hasher: &Mimc7, input: &str) -> Result<()> {
    let json = fs::read_to_string(input).with_context(|| format!("reading witness {input}"))?;
    let record: WitnessRecord =
        serde_json::from_str(&json).with_context(|| format!("parsing witness {input}"))?;

    let new_root = verify_record(hasher, &record)?;
    println!("[check] Witness record verified");
    println!("[check] New root: {new_root}");

    Ok(())
}
