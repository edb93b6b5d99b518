//! Witness construction for a private two-account balance transfer.
//!
//! Produces the full input record the transfer circuit expects: account
//! commitments, chained Merkle roots (old → intermediate → new), an EdDSA
//! signature over the transaction hash, and sibling proofs for both leaves.
//! All hashing is circomlib-compatible MiMC7 over the BN254 scalar field,
//! which is also the base field of the Baby Jubjub curve used for signing.

use std::str::FromStr;

use ark_ec::{CurveGroup, PrimeGroup};
use ark_ff::{BigInteger, Field, PrimeField, Zero};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};

pub use ark_ed_on_bn254::{EdwardsAffine, EdwardsProjective, Fq, Fr};

/// Depth of the account ledger. Two accounts, one level.
pub const TREE_DEPTH: usize = 1;

// =============================================================================
//                               ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WitnessError {
    /// A textual field of a record or request did not parse.
    #[error("malformed field: {0}")]
    Malformed(String),
    /// The transfer would drive the sender balance below zero.
    #[error("transfer amount {amount} exceeds sender balance {balance}")]
    InvalidTransfer { amount: u64, balance: u64 },
    /// The signing key does not own the sender account.
    #[error("signer public key does not match the sender account")]
    SignerMismatch,
    /// A scalar or coordinate lies outside the field or curve.
    #[error("value outside the field or curve domain: {0}")]
    OutOfDomain(&'static str),
    /// The record's signature does not verify against its own fields.
    #[error("signature does not verify against the sender key and transaction hash")]
    InvalidSignature,
    /// A recomputed root disagrees with the one the record claims.
    #[error("recomputed root does not match the record: {0}")]
    RootMismatch(&'static str),
}

// =============================================================================
//                          MIMC7 FIELD HASHER
// =============================================================================

/// Compute keccak256. Only used to derive the MiMC7 round constants;
/// all data hashing goes through the field hasher below.
fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

const MIMC_SEED: &[u8] = b"mimc";
const MIMC_ROUNDS: usize = 91;

/// MiMC7 multi-input hash over the BN254 scalar field, matching circomlib's
/// `mimc7.multiHash` bit for bit (the circuit constrains the same primitive).
///
/// Round constants: `cts[0] = 0`, then a keccak256 chain seeded with the
/// ASCII string "mimc" where each link feeds the previous *raw* 32-byte
/// digest back in and the constant is the digest reduced mod p. Chaining the
/// reduced or zero-stripped value instead silently changes the hash.
///
/// The multi-input fold starts from zero, i.e. circomlib's `multiHash` with
/// `k = 0`. Some generators wire a nonzero `k` into the circuit's
/// `MultiMiMC7` key input; when integrating a new circuit, confirm its `k`
/// signal is constrained to 0 or the roots will disagree.
///
/// Build once and pass by reference; there is no global hasher state.
#[derive(Clone, Debug)]
pub struct Mimc7 {
    constants: Vec<Fq>,
}

impl Mimc7 {
    pub fn new() -> Self {
        let mut constants = Vec::with_capacity(MIMC_ROUNDS);
        constants.push(Fq::zero());
        let mut digest = keccak256(MIMC_SEED);
        for _ in 1..MIMC_ROUNDS {
            digest = keccak256(&digest);
            constants.push(Fq::from_be_bytes_mod_order(&digest));
        }
        Self { constants }
    }

    /// The MiMC7 block permutation: 91 rounds of `t^7` with key `k`,
    /// plus the final key addition.
    fn permute(&self, x: Fq, k: Fq) -> Fq {
        let mut h = Fq::zero();
        for (i, c) in self.constants.iter().enumerate() {
            let t = if i == 0 { x + k } else { h + k + c };
            let t2 = t.square();
            let t4 = t2.square();
            h = t4 * t2 * t; // t^7
        }
        h + k
    }

    /// Hash a sequence of field elements into one. Accepts any length;
    /// outputs feed back in as inputs, so tree levels can be iterated.
    pub fn hash(&self, inputs: &[Fq]) -> Fq {
        let mut acc = Fq::zero();
        for x in inputs {
            acc += *x + self.permute(*x, acc);
        }
        acc
    }
}

impl Default for Mimc7 {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
//                      FIELD / SCALAR CONVERSIONS
// =============================================================================

/// Interpret 32 big-endian bytes as a canonical base-field element.
/// Returns `None` for values at or above the modulus.
fn fq_from_be_bytes(bytes: &[u8; 32]) -> Option<Fq> {
    let mut limbs = [0u64; 4];
    for (i, chunk) in bytes.rchunks(8).enumerate() {
        let mut buf = [0u8; 8];
        buf[8 - chunk.len()..].copy_from_slice(chunk);
        limbs[i] = u64::from_be_bytes(buf);
    }
    Fq::from_bigint(ark_ff::BigInt::new(limbs))
}

/// Reduce a base-field element into the Baby Jubjub subgroup scalar field.
fn fq_to_fr(el: Fq) -> Fr {
    Fr::from_le_bytes_mod_order(&el.into_bigint().to_bytes_le())
}

/// Lift a subgroup scalar into the base field. Lossless: the subgroup
/// order is smaller than the field modulus.
fn fr_to_fq(el: Fr) -> Fq {
    Fq::from_le_bytes_mod_order(&el.into_bigint().to_bytes_le())
}

fn decimal<F: PrimeField>(el: F) -> String {
    el.into_bigint().to_string()
}

// =============================================================================
//                      EDDSA OVER BABY JUBJUB
// =============================================================================

/// A Baby Jubjub key pair. The private scalar is folded out of a 32-byte
/// seed through the field hasher, so key generation is deterministic and
/// needs no runtime randomness.
#[derive(Clone, Copy, Debug)]
pub struct Keypair {
    secret: Fr,
    pub public: EdwardsAffine,
}

/// An EdDSA signature: the nonce commitment point and the response scalar.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature {
    pub r8: EdwardsAffine,
    pub s: Fr,
}

impl Keypair {
    /// Derive a key pair from a fixed-length seed.
    ///
    /// The seed must encode a canonical field element (big-endian). The
    /// private scalar is `reduce(Mimc7([seed]))`; the public key is the
    /// subgroup generator scaled by it.
    pub fn from_seed(hasher: &Mimc7, seed: &[u8; 32]) -> Result<Self, WitnessError> {
        let seed_el = fq_from_be_bytes(seed)
            .ok_or(WitnessError::OutOfDomain("seed exceeds the field modulus"))?;
        let secret = fq_to_fr(hasher.hash(&[seed_el]));
        if secret.is_zero() {
            return Err(WitnessError::OutOfDomain("derived private scalar is zero"));
        }
        let public = (EdwardsProjective::generator() * secret).into_affine();
        Ok(Self { secret, public })
    }

    /// Sign a field-element message.
    ///
    /// The nonce is folded deterministically from the private scalar and the
    /// message through the same field hasher, so identical inputs always
    /// yield the identical signature.
    pub fn sign(&self, hasher: &Mimc7, message: Fq) -> Signature {
        let nonce = fq_to_fr(hasher.hash(&[fr_to_fq(self.secret), message]));
        let r8 = (EdwardsProjective::generator() * nonce).into_affine();
        let hm = challenge(hasher, &r8, &self.public, message);
        Signature {
            r8,
            s: nonce + fq_to_fr(hm) * self.secret,
        }
    }
}

/// The Fiat–Shamir challenge: a 5-input MiMC7 hash binding the nonce point,
/// the public key, and the message.
fn challenge(hasher: &Mimc7, r8: &EdwardsAffine, public: &EdwardsAffine, message: Fq) -> Fq {
    hasher.hash(&[r8.x, r8.y, public.x, public.y, message])
}

/// Check `G * S == R8 + public * hm`.
pub fn verify_signature(
    hasher: &Mimc7,
    public: &EdwardsAffine,
    message: Fq,
    signature: &Signature,
) -> bool {
    let hm = fq_to_fr(challenge(hasher, &signature.r8, public, message));
    EdwardsProjective::generator() * signature.s
        == EdwardsProjective::from(signature.r8) + EdwardsProjective::from(*public) * hm
}

// =============================================================================
//                      ACCOUNTS AND COMMITMENTS
// =============================================================================

/// A ledger account: a public key and a balance. Immutable once committed;
/// a transfer produces new `Account` values rather than mutating in place.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Account {
    pub public_key: EdwardsAffine,
    pub balance: u64,
}

impl Account {
    /// The account commitment: `Mimc7([pubkey.x, pubkey.y, balance])`.
    /// The balance participates as a field element, not a machine integer.
    pub fn commitment(&self, hasher: &Mimc7) -> Fq {
        hasher.hash(&[
            self.public_key.x,
            self.public_key.y,
            Fq::from(self.balance),
        ])
    }
}

/// Hash the transaction fields the sender authorizes:
/// both public keys and the amount, in one 5-input invocation.
pub fn transaction_hash(
    hasher: &Mimc7,
    sender_key: &EdwardsAffine,
    receiver_key: &EdwardsAffine,
    amount: u64,
) -> Fq {
    hasher.hash(&[
        sender_key.x,
        sender_key.y,
        receiver_key.x,
        receiver_key.y,
        Fq::from(amount),
    ])
}

// =============================================================================
//                          LEDGER ACCUMULATOR
// =============================================================================

/// A single step in a Merkle sibling proof.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MerkleStep {
    /// The sibling hash at this level.
    pub sibling: Fq,
    /// true if the current node is the LEFT child at this level.
    pub is_left: bool,
}

/// A fixed-depth Merkle accumulator over account commitments.
///
/// Depth is configurable even though the transfer ledger only exercises
/// depth 1; missing leaves are zero-padded. The root is always derived
/// from the leaves, never stored as ground truth.
#[derive(Clone, Debug)]
pub struct LedgerTree {
    depth: usize,
    leaves: Vec<Fq>,
}

impl LedgerTree {
    pub fn new(depth: usize, mut leaves: Vec<Fq>) -> Self {
        assert!(
            leaves.len() <= 1 << depth,
            "too many leaves for tree depth"
        );
        leaves.resize(1 << depth, Fq::zero());
        Self { depth, leaves }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn leaf(&self, index: usize) -> Fq {
        self.leaves[index]
    }

    /// Fold the leaves pairwise up to the root.
    pub fn root(&self, hasher: &Mimc7) -> Fq {
        let mut level = self.leaves.clone();
        while level.len() > 1 {
            level = level
                .chunks(2)
                .map(|pair| hasher.hash(&[pair[0], pair[1]]))
                .collect();
        }
        level[0]
    }

    /// The sibling proof for the leaf at `index`, ordered leaf to root.
    pub fn proof(&self, hasher: &Mimc7, index: usize) -> Vec<MerkleStep> {
        assert!(index < self.leaves.len(), "leaf index out of range");

        let mut steps = Vec::with_capacity(self.depth);
        let mut level = self.leaves.clone();
        let mut idx = index;

        for _ in 0..self.depth {
            steps.push(MerkleStep {
                sibling: level[idx ^ 1],
                is_left: idx % 2 == 0,
            });
            level = level
                .chunks(2)
                .map(|pair| hasher.hash(&[pair[0], pair[1]]))
                .collect();
            idx /= 2;
        }

        steps
    }

    /// Replace one leaf and return `(old_root, new_root)`. Sequential
    /// updates chain: the root after the first update is exactly the
    /// intermediate state the witness must prove against.
    pub fn update(&mut self, hasher: &Mimc7, index: usize, new_leaf: Fq) -> (Fq, Fq) {
        assert!(index < self.leaves.len(), "leaf index out of range");
        let old_root = self.root(hasher);
        self.leaves[index] = new_leaf;
        (old_root, self.root(hasher))
    }
}

/// Recombine a leaf with its sibling proof and compare against a root.
pub fn verify_merkle_proof(
    hasher: &Mimc7,
    leaf: Fq,
    proof: &[MerkleStep],
    expected_root: Fq,
) -> bool {
    let mut current = leaf;
    for step in proof {
        current = if step.is_left {
            hasher.hash(&[current, step.sibling])
        } else {
            hasher.hash(&[step.sibling, current])
        };
    }
    current == expected_root
}

// =============================================================================
//                          WITNESS ASSEMBLY
// =============================================================================

/// The complete witness for one transfer. Immutable once built; serialized
/// through [`WitnessRecord`] for the external prover.
#[derive(Clone, Debug)]
pub struct Witness {
    pub old_root: Fq,
    pub intermediate_root: Fq,
    pub new_root: Fq,
    /// Sender account under its pre-transfer balance.
    pub sender: Account,
    /// Receiver account under its pre-transfer balance.
    pub receiver: Account,
    pub amount: u64,
    pub signature: Signature,
    /// Proof for the sender leaf against the pre-transfer tree.
    pub sender_proof: Vec<MerkleStep>,
    /// Proof for the receiver leaf against the intermediate tree, so its
    /// sibling is the post-debit sender leaf.
    pub receiver_proof: Vec<MerkleStep>,
}

/// Build the witness for transferring `amount` from `sender` to `receiver`.
///
/// Runs the five stages in strict sequence: commit and root, transaction
/// hash, signature, chained root transitions (sender debit first, receiver
/// credit second), assembly. Pure and deterministic; identical inputs
/// produce identical witnesses.
pub fn build_witness(
    hasher: &Mimc7,
    signer: &Keypair,
    sender: &Account,
    receiver: &Account,
    amount: u64,
) -> Result<Witness, WitnessError> {
    if signer.public != sender.public_key {
        return Err(WitnessError::SignerMismatch);
    }
    if amount > sender.balance {
        return Err(WitnessError::InvalidTransfer {
            amount,
            balance: sender.balance,
        });
    }
    let credited_balance = receiver
        .balance
        .checked_add(amount)
        .ok_or(WitnessError::OutOfDomain("credited balance overflows"))?;

    // Stage 1: commitments under current balances, pre-transfer root,
    // and the sender's proof against that tree.
    let mut tree = LedgerTree::new(
        TREE_DEPTH,
        vec![sender.commitment(hasher), receiver.commitment(hasher)],
    );
    let old_root = tree.root(hasher);
    let sender_proof = tree.proof(hasher, 0);

    // Stages 2 and 3: hash the transaction and sign it.
    let tx_hash = transaction_hash(hasher, &sender.public_key, &receiver.public_key, amount);
    let signature = signer.sign(hasher, tx_hash);

    // Stage 4: chained transitions, one leaf at a time. The receiver's
    // proof is taken after the debit so its sibling is the updated leaf.
    let debited = Account {
        public_key: sender.public_key,
        balance: sender.balance - amount,
    };
    let (_, intermediate_root) = tree.update(hasher, 0, debited.commitment(hasher));
    let receiver_proof = tree.proof(hasher, 1);

    let credited = Account {
        public_key: receiver.public_key,
        balance: credited_balance,
    };
    let (_, new_root) = tree.update(hasher, 1, credited.commitment(hasher));

    // Stage 5: assemble.
    Ok(Witness {
        old_root,
        intermediate_root,
        new_root,
        sender: *sender,
        receiver: *receiver,
        amount,
        signature,
        sender_proof,
        receiver_proof,
    })
}

// =============================================================================
//                            WIRE RECORD
// =============================================================================

/// The serialized witness, field for field what the circuit's input schema
/// expects. Every value is a base-10 decimal string to avoid precision loss
/// in JSON. `new_root` is deliberately absent: the circuit recomputes it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessRecord {
    pub accounts_root: String,
    pub intermediate_root: String,
    pub accounts_balance: [String; 2],
    pub sender_pubkey: [String; 2],
    pub sender_balance: String,
    pub receiver_pubkey: [String; 2],
    pub receiver_balance: String,
    pub amount: String,
    #[serde(rename = "signature_R8x")]
    pub signature_r8x: String,
    #[serde(rename = "signature_R8y")]
    pub signature_r8y: String,
    #[serde(rename = "signature_S")]
    pub signature_s: String,
    pub sender_proof: Vec<String>,
    pub sender_proof_pos: Vec<String>,
    pub receiver_proof: Vec<String>,
    pub receiver_proof_pos: Vec<String>,
    /// Constant "1": flags the transaction as active for the circuit.
    pub enabled: String,
}

fn encode_proof(steps: &[MerkleStep]) -> (Vec<String>, Vec<String>) {
    steps
        .iter()
        .map(|step| {
            let pos = if step.is_left { "0" } else { "1" };
            (decimal(step.sibling), pos.to_string())
        })
        .unzip()
}

impl Witness {
    pub fn to_record(&self) -> WitnessRecord {
        let (sender_proof, sender_proof_pos) = encode_proof(&self.sender_proof);
        let (receiver_proof, receiver_proof_pos) = encode_proof(&self.receiver_proof);

        WitnessRecord {
            accounts_root: decimal(self.old_root),
            intermediate_root: decimal(self.intermediate_root),
            accounts_balance: [
                self.sender.balance.to_string(),
                self.receiver.balance.to_string(),
            ],
            sender_pubkey: [
                decimal(self.sender.public_key.x),
                decimal(self.sender.public_key.y),
            ],
            sender_balance: self.sender.balance.to_string(),
            receiver_pubkey: [
                decimal(self.receiver.public_key.x),
                decimal(self.receiver.public_key.y),
            ],
            receiver_balance: self.receiver.balance.to_string(),
            amount: self.amount.to_string(),
            signature_r8x: decimal(self.signature.r8.x),
            signature_r8y: decimal(self.signature.r8.y),
            signature_s: decimal(self.signature.s),
            sender_proof,
            sender_proof_pos,
            receiver_proof,
            receiver_proof_pos,
            enabled: "1".to_string(),
        }
    }
}

// =============================================================================
//                        RECORD RE-VERIFICATION
// =============================================================================

// `from_str` on arkworks fields reduces over-modulus decimals mod p, so an
// accepted value must also round-trip back to the exact input string. Without
// that check two byte-distinct records could verify as the same witness.
fn parse_field(value: &str) -> Result<Fq, WitnessError> {
    let parsed = Fq::from_str(value)
        .map_err(|_| WitnessError::Malformed(format!("not a field element: {value}")))?;
    if decimal(parsed) != value {
        return Err(WitnessError::OutOfDomain(
            "field element outside the canonical range",
        ));
    }
    Ok(parsed)
}

fn parse_scalar(value: &str) -> Result<Fr, WitnessError> {
    let parsed = Fr::from_str(value)
        .map_err(|_| WitnessError::Malformed(format!("not a scalar: {value}")))?;
    if decimal(parsed) != value {
        return Err(WitnessError::OutOfDomain(
            "scalar outside the canonical range",
        ));
    }
    Ok(parsed)
}

fn parse_u64(value: &str) -> Result<u64, WitnessError> {
    value
        .parse::<u64>()
        .map_err(|_| WitnessError::Malformed(format!("not a non-negative integer: {value}")))
}

fn parse_point(x: &str, y: &str) -> Result<EdwardsAffine, WitnessError> {
    let point = EdwardsAffine::new_unchecked(parse_field(x)?, parse_field(y)?);
    if !point.is_on_curve() {
        return Err(WitnessError::OutOfDomain("point is not on the curve"));
    }
    if !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(WitnessError::OutOfDomain(
            "point is outside the prime-order subgroup",
        ));
    }
    Ok(point)
}

fn parse_proof(
    siblings: &[String],
    positions: &[String],
) -> Result<Vec<MerkleStep>, WitnessError> {
    if siblings.len() != positions.len() {
        return Err(WitnessError::Malformed(
            "proof and position arrays differ in length".to_string(),
        ));
    }
    siblings
        .iter()
        .zip(positions)
        .map(|(sibling, pos)| {
            let is_left = match pos.as_str() {
                "0" => true,
                "1" => false,
                other => {
                    return Err(WitnessError::Malformed(format!(
                        "proof position is not a bit: {other}"
                    )))
                }
            };
            Ok(MerkleStep {
                sibling: parse_field(sibling)?,
                is_left,
            })
        })
        .collect()
}

/// Re-verify an emitted record from its serialized fields alone: recompute
/// both roots, check the signature and both sibling proofs. Returns the
/// recomputed post-transfer root on success.
pub fn verify_record(hasher: &Mimc7, record: &WitnessRecord) -> Result<Fq, WitnessError> {
    if record.enabled != "1" {
        return Err(WitnessError::Malformed(format!(
            "enabled flag must be \"1\", got {:?}",
            record.enabled
        )));
    }
    let sender_balance = parse_u64(&record.sender_balance)?;
    let receiver_balance = parse_u64(&record.receiver_balance)?;
    if record.accounts_balance[0] != record.sender_balance
        || record.accounts_balance[1] != record.receiver_balance
    {
        return Err(WitnessError::Malformed(
            "accounts_balance disagrees with the per-account balances".to_string(),
        ));
    }
    let amount = parse_u64(&record.amount)?;
    if amount > sender_balance {
        return Err(WitnessError::InvalidTransfer {
            amount,
            balance: sender_balance,
        });
    }

    let sender = Account {
        public_key: parse_point(&record.sender_pubkey[0], &record.sender_pubkey[1])?,
        balance: sender_balance,
    };
    let receiver = Account {
        public_key: parse_point(&record.receiver_pubkey[0], &record.receiver_pubkey[1])?,
        balance: receiver_balance,
    };

    let sender_leaf = sender.commitment(hasher);
    let mut tree = LedgerTree::new(TREE_DEPTH, vec![sender_leaf, receiver.commitment(hasher)]);
    let old_root = tree.root(hasher);
    if old_root != parse_field(&record.accounts_root)? {
        return Err(WitnessError::RootMismatch("accounts_root"));
    }

    let signature = Signature {
        r8: parse_point(&record.signature_r8x, &record.signature_r8y)?,
        s: parse_scalar(&record.signature_s)?,
    };
    let tx_hash = transaction_hash(hasher, &sender.public_key, &receiver.public_key, amount);
    if !verify_signature(hasher, &sender.public_key, tx_hash, &signature) {
        return Err(WitnessError::InvalidSignature);
    }

    let debited = Account {
        public_key: sender.public_key,
        balance: sender_balance - amount,
    };
    let (_, intermediate_root) = tree.update(hasher, 0, debited.commitment(hasher));
    if intermediate_root != parse_field(&record.intermediate_root)? {
        return Err(WitnessError::RootMismatch("intermediate_root"));
    }

    let sender_proof = parse_proof(&record.sender_proof, &record.sender_proof_pos)?;
    if !verify_merkle_proof(hasher, sender_leaf, &sender_proof, old_root) {
        return Err(WitnessError::RootMismatch("sender_proof"));
    }

    let credited = Account {
        public_key: receiver.public_key,
        balance: receiver_balance
            .checked_add(amount)
            .ok_or(WitnessError::OutOfDomain("credited balance overflows"))?,
    };
    let credited_leaf = credited.commitment(hasher);
    let (_, new_root) = tree.update(hasher, 1, credited_leaf);

    let receiver_proof = parse_proof(&record.receiver_proof, &record.receiver_proof_pos)?;
    if !verify_merkle_proof(hasher, credited_leaf, &receiver_proof, new_root) {
        return Err(WitnessError::RootMismatch("receiver_proof"));
    }

    Ok(new_root)
}

// =============================================================================
//                              TESTS
// =============================================================================
