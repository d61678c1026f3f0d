//! Property-based tests for the symmetric ratchet
//!
//! A key exported at index `k` must decrypt every later message in any
//! order, and none before `k`.

use std::collections::BTreeMap;

use proptest::prelude::*;
use roomcrypt_core::{InboundGroupSession, RatchetEngine, RatchetError};
use roomcrypt_harness::SimEnv;
use roomcrypt_proto::{Curve25519Key, RoomId};
use roomcrypt_ratchet::SymmetricRatchetEngine;

fn room() -> RoomId {
    RoomId::from("!room:x")
}

fn sender_key() -> Curve25519Key {
    Curve25519Key::from("alice-curve")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: decryption succeeds exactly for indices at or after the
    /// exported key's index, regardless of arrival order
    #[test]
    fn prop_exported_key_covers_later_indices(
        before in 0..10usize,
        after in 1..10usize,
        seed in any::<u64>(),
        order in any::<u64>(),
    ) {
        let sender = SymmetricRatchetEngine::new(SimEnv::with_seed(seed));
        let receiver = SymmetricRatchetEngine::new(SimEnv::with_seed(seed ^ 1));
        let session_id = sender.create_outbound(&room()).unwrap();

        let mut ciphertexts = Vec::new();
        for i in 0..before {
            ciphertexts.push((i, sender.encrypt(&session_id, &[i as u8]).unwrap()));
        }
        let exported = sender.export_outbound_key(&session_id).unwrap();
        prop_assert_eq!(exported.index as usize, before);
        for i in before..before + after {
            ciphertexts.push((i, sender.encrypt(&session_id, &[i as u8]).unwrap()));
        }

        let record = InboundGroupSession {
            session_id: session_id.clone(),
            sender_key: sender_key(),
            room_id: room(),
            forwarding_chain: Vec::new(),
            claimed_keys: BTreeMap::new(),
            export_format: false,
            first_known_index: exported.index,
        };
        receiver.install_inbound(&record, &exported.key).unwrap();

        // Deterministic shuffle driven by the generated value
        let len = ciphertexts.len();
        for i in (1..len).rev() {
            let j = (order.rotate_left(i as u32) as usize) % (i + 1);
            ciphertexts.swap(i, j);
        }

        for (index, ciphertext) in &ciphertexts {
            let result = receiver.decrypt(&room(), &sender_key(), &session_id, ciphertext);
            if *index >= before {
                let block = result.unwrap();
                prop_assert_eq!(block.plaintext, vec![*index as u8]);
                prop_assert_eq!(block.message_index as usize, *index);
            } else {
                prop_assert_eq!(
                    result,
                    Err(RatchetError::UnknownMessageIndex { index: *index as u32 })
                );
            }
        }
    }
}
