#[cfg(test)]
mod tests {
    use ark_ff::PrimeField;
    use rand::Rng;
    use transfer_witness_lib::*;

    const SENDER_SEED: [u8; 32] = [0x01; 32];
    const RECEIVER_SEED: [u8; 32] = [0x02; 32];
    const SENDER_BALANCE: u64 = 500;
    const RECEIVER_BALANCE: u64 = 0;

    fn decimal(el: Fq) -> String {
        el.into_bigint().to_string()
    }

    /// The standard scenario: sender at 500, receiver at 0.
    fn setup(hasher: &Mimc7) -> (Keypair, Account, Account) {
        let sender_key = Keypair::from_seed(hasher, &SENDER_SEED).unwrap();
        let receiver_key = Keypair::from_seed(hasher, &RECEIVER_SEED).unwrap();
        let sender = Account {
            public_key: sender_key.public,
            balance: SENDER_BALANCE,
        };
        let receiver = Account {
            public_key: receiver_key.public,
            balance: RECEIVER_BALANCE,
        };
        (sender_key, sender, receiver)
    }

    fn build(hasher: &Mimc7, amount: u64) -> Witness {
        let (sender_key, sender, receiver) = setup(hasher);
        build_witness(hasher, &sender_key, &sender, &receiver, amount).unwrap()
    }

    #[test]
    fn test_root_consistency() {
        let h = Mimc7::new();
        let witness = build(&h, 150);
        let expected = h.hash(&[
            witness.sender.commitment(&h),
            witness.receiver.commitment(&h),
        ]);
        assert_eq!(witness.old_root, expected);
    }

    #[test]
    fn test_chained_transition() {
        let h = Mimc7::new();
        let witness = build(&h, 150);

        let debited = Account {
            public_key: witness.sender.public_key,
            balance: witness.sender.balance - witness.amount,
        };
        let credited = Account {
            public_key: witness.receiver.public_key,
            balance: witness.receiver.balance + witness.amount,
        };

        // The intermediate root differs from the old root only via the
        // sender leaf, the new root from the intermediate only via the
        // receiver leaf.
        assert_eq!(
            witness.intermediate_root,
            h.hash(&[debited.commitment(&h), witness.receiver.commitment(&h)])
        );
        assert_eq!(
            witness.new_root,
            h.hash(&[debited.commitment(&h), credited.commitment(&h)])
        );
        assert_ne!(witness.old_root, witness.intermediate_root);
        assert_ne!(witness.intermediate_root, witness.new_root);
    }

    #[test]
    fn test_conservation() {
        let h = Mimc7::new();
        let mut rng = rand::thread_rng();
        for _ in 0..8 {
            let amount = rng.gen_range(0..=SENDER_BALANCE);
            let witness = build(&h, amount);
            let before = witness.sender.balance + witness.receiver.balance;
            let after =
                (witness.sender.balance - amount) + (witness.receiver.balance + amount);
            assert_eq!(before, after);
        }
    }

    #[test]
    fn test_signature_soundness() {
        let h = Mimc7::new();
        let witness = build(&h, 150);

        let tx_hash = transaction_hash(
            &h,
            &witness.sender.public_key,
            &witness.receiver.public_key,
            witness.amount,
        );
        assert!(verify_signature(
            &h,
            &witness.sender.public_key,
            tx_hash,
            &witness.signature
        ));

        // A different amount changes the transaction hash.
        let tampered = transaction_hash(
            &h,
            &witness.sender.public_key,
            &witness.receiver.public_key,
            witness.amount ^ 1,
        );
        assert!(!verify_signature(
            &h,
            &witness.sender.public_key,
            tampered,
            &witness.signature
        ));

        // Swapping the keys changes it too.
        let swapped = transaction_hash(
            &h,
            &witness.receiver.public_key,
            &witness.sender.public_key,
            witness.amount,
        );
        assert!(!verify_signature(
            &h,
            &witness.sender.public_key,
            swapped,
            &witness.signature
        ));

        // So does a single flipped bit in either pubkey coordinate.
        let mut flipped_sender = witness.sender.public_key;
        flipped_sender.x += Fq::from(1u64);
        let mutated = transaction_hash(
            &h,
            &flipped_sender,
            &witness.receiver.public_key,
            witness.amount,
        );
        assert!(!verify_signature(
            &h,
            &witness.sender.public_key,
            mutated,
            &witness.signature
        ));

        let mut flipped_receiver = witness.receiver.public_key;
        flipped_receiver.y += Fq::from(1u64);
        let mutated = transaction_hash(
            &h,
            &witness.sender.public_key,
            &flipped_receiver,
            witness.amount,
        );
        assert!(!verify_signature(
            &h,
            &witness.sender.public_key,
            mutated,
            &witness.signature
        ));
    }

    #[test]
    fn test_determinism() {
        let h = Mimc7::new();
        let first = serde_json::to_string(&build(&h, 150).to_record()).unwrap();
        let second = serde_json::to_string(&build(&h, 150).to_record()).unwrap();
        assert_eq!(first, second, "identical inputs must give identical bytes");
    }

    #[test]
    fn test_concrete_scenario() {
        // 500 / 0, transfer 150: balances end at 350 / 150 and recomputing
        // the new root from the updated accounts independently must match.
        let h = Mimc7::new();
        let witness = build(&h, 150);

        let sender_after = Account {
            public_key: witness.sender.public_key,
            balance: 350,
        };
        let receiver_after = Account {
            public_key: witness.receiver.public_key,
            balance: 150,
        };
        let recomputed = h.hash(&[
            sender_after.commitment(&h),
            receiver_after.commitment(&h),
        ]);
        assert_eq!(witness.new_root, recomputed);
    }

    #[test]
    fn test_proof_validity() {
        let h = Mimc7::new();
        let witness = build(&h, 150);

        // Sender proof recombines to the pre-transfer root.
        assert!(verify_merkle_proof(
            &h,
            witness.sender.commitment(&h),
            &witness.sender_proof,
            witness.old_root
        ));

        // Receiver proof is against the intermediate tree; combined with the
        // credited leaf it recombines to the post-transfer root.
        let credited = Account {
            public_key: witness.receiver.public_key,
            balance: witness.receiver.balance + witness.amount,
        };
        assert!(verify_merkle_proof(
            &h,
            credited.commitment(&h),
            &witness.receiver_proof,
            witness.new_root
        ));
    }

    #[test]
    fn test_zero_amount_boundary() {
        let h = Mimc7::new();
        let witness = build(&h, 0);
        assert_eq!(witness.old_root, witness.intermediate_root);
        assert_eq!(witness.old_root, witness.new_root);
    }

    #[test]
    fn test_insufficient_balance_rejected() {
        let h = Mimc7::new();
        let (sender_key, sender, receiver) = setup(&h);
        let err = build_witness(&h, &sender_key, &sender, &receiver, SENDER_BALANCE + 1)
            .unwrap_err();
        assert_eq!(
            err,
            WitnessError::InvalidTransfer {
                amount: SENDER_BALANCE + 1,
                balance: SENDER_BALANCE,
            }
        );
    }

    #[test]
    fn test_signer_mismatch_rejected() {
        let h = Mimc7::new();
        let (_, sender, receiver) = setup(&h);
        let wrong_key = Keypair::from_seed(&h, &[0x03; 32]).unwrap();
        let err = build_witness(&h, &wrong_key, &sender, &receiver, 150).unwrap_err();
        assert_eq!(err, WitnessError::SignerMismatch);
    }

    #[test]
    fn test_record_schema() {
        let h = Mimc7::new();
        let witness = build(&h, 150);
        let record = witness.to_record();
        let json = serde_json::to_string(&record).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        for field in [
            "accounts_root",
            "intermediate_root",
            "accounts_balance",
            "sender_pubkey",
            "sender_balance",
            "receiver_pubkey",
            "receiver_balance",
            "amount",
            "signature_R8x",
            "signature_R8y",
            "signature_S",
            "sender_proof",
            "sender_proof_pos",
            "receiver_proof",
            "receiver_proof_pos",
            "enabled",
        ] {
            assert!(value.get(field).is_some(), "missing field {field}");
        }

        assert_eq!(value["enabled"], "1");
        assert_eq!(value["amount"], "150");
        assert_eq!(value["sender_balance"], "500");
        assert_eq!(value["accounts_balance"][0], "500");
        assert_eq!(value["accounts_balance"][1], "0");
        assert_eq!(value["sender_proof"].as_array().unwrap().len(), TREE_DEPTH);
        assert_eq!(value["sender_proof_pos"][0], "0");
        assert_eq!(value["receiver_proof_pos"][0], "1");

        // The sender's sibling is the original receiver leaf; the receiver's
        // sibling is the post-debit sender leaf.
        assert_eq!(
            value["sender_proof"][0],
            decimal(witness.receiver.commitment(&h)).as_str()
        );
        let debited = Account {
            public_key: witness.sender.public_key,
            balance: witness.sender.balance - witness.amount,
        };
        assert_eq!(
            value["receiver_proof"][0],
            decimal(debited.commitment(&h)).as_str()
        );
    }

    #[test]
    fn test_record_roundtrip_and_verify() {
        let h = Mimc7::new();
        let record = build(&h, 150).to_record();
        let json = serde_json::to_string_pretty(&record).unwrap();
        let parsed: WitnessRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);

        let expected_new_root = build(&h, 150).new_root;
        assert_eq!(verify_record(&h, &parsed).unwrap(), expected_new_root);
    }

    #[test]
    fn test_non_canonical_encoding_rejected() {
        use ark_ff::BigInteger;
        use std::str::FromStr;

        let h = Mimc7::new();
        let record = build(&h, 150).to_record();

        // Same residue mod p, different bytes: the canonical root plus the
        // modulus. A record is bound to one byte encoding per value.
        let mut over = Fq::from_str(&record.accounts_root)
            .unwrap()
            .into_bigint();
        let overflow = over.add_with_carry(&Fq::MODULUS);
        assert!(!overflow);

        let mut shifted_root = record.clone();
        shifted_root.accounts_root = over.to_string();
        assert_eq!(
            verify_record(&h, &shifted_root).unwrap_err(),
            WitnessError::OutOfDomain("field element outside the canonical range")
        );

        // Same for the response scalar, against the subgroup order.
        let mut over_s = Fr::from_str(&record.signature_s)
            .unwrap()
            .into_bigint();
        let overflow = over_s.add_with_carry(&Fr::MODULUS);
        assert!(!overflow);

        let mut shifted_scalar = record;
        shifted_scalar.signature_s = over_s.to_string();
        assert_eq!(
            verify_record(&h, &shifted_scalar).unwrap_err(),
            WitnessError::OutOfDomain("scalar outside the canonical range")
        );
    }

    #[test]
    fn test_tampered_record_rejected() {
        let h = Mimc7::new();
        let record = build(&h, 150).to_record();

        let mut bumped_amount = record.clone();
        bumped_amount.amount = "151".to_string();
        assert!(verify_record(&h, &bumped_amount).is_err());

        let mut bumped_balance = record.clone();
        bumped_balance.sender_balance = "501".to_string();
        bumped_balance.accounts_balance[0] = "501".to_string();
        assert!(verify_record(&h, &bumped_balance).is_err());

        let mut wrong_root = record;
        wrong_root.accounts_root = "1".to_string();
        assert_eq!(
            verify_record(&h, &wrong_root).unwrap_err(),
            WitnessError::RootMismatch("accounts_root")
        );
    }
}
