use metaid_engine::fees::FeeSchedule;
use metaid_engine::inscription::{chunk_body, count_pushes, RevealScripts, MAX_CHUNK_LEN};
use metaid_engine::pin::{MetaidRecord, Operation};
use metaid_engine::script::opcodes::{OP_DROP, OP_PUSHDATA1, OP_PUSHDATA2};
use metaid_engine::script::{decode, Instruction, ScriptBuilder};
use metaid_engine::wallet::{total_value, SelectionTarget, Utxo, UtxoSelector};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn push_len() -> impl Strategy<Value = usize> {
    prop_oneof![0usize..80, 250usize..260, 65_530usize..65_540]
}

fn utxo_values() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(600u64..200_000, 1..12)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn push_prefix_tracks_length(len in push_len(), fill in any::<u8>()) {
        let data = vec![fill; len];
        let bytes = ScriptBuilder::new().push(data.clone()).to_bytes();

        let header = match len {
            0 => 1,
            1..=75 => 1,
            76..=0xff => 2,
            _ => 3,
        };
        prop_assert_eq!(bytes.len(), header + len);
        match len {
            0 => prop_assert_eq!(bytes[0], 0),
            1..=75 => prop_assert_eq!(bytes[0] as usize, len),
            76..=0xff => prop_assert_eq!(bytes[0], OP_PUSHDATA1),
            _ => prop_assert_eq!(bytes[0], OP_PUSHDATA2),
        }
        prop_assert_eq!(decode(&bytes).unwrap(), vec![Instruction::Push(data)]);
    }

    #[test]
    fn truncated_push_never_decodes(len in 1usize..300, cut in 1usize..5) {
        let bytes = ScriptBuilder::new().push(vec![7u8; len]).to_bytes();
        let cut = cut.min(len);
        prop_assert!(decode(&bytes[..bytes.len() - cut]).is_err());
    }

    #[test]
    fn selection_stops_at_first_cover(values in utxo_values(), amount in 1i64..300_000, seed in any::<u64>()) {
        let utxos: Vec<Utxo> = values
            .iter()
            .enumerate()
            .map(|(i, v)| Utxo::new(format!("{:064x}", i), 0, *v, "addr"))
            .collect();
        let selector = UtxoSelector::new(FeeSchedule::mvc());
        let target = SelectionTarget::new(amount, 1);
        let mut rng = StdRng::seed_from_u64(seed);

        match selector.select_with_rng(&utxos, &target, &mut rng) {
            Ok(selection) => {
                let n = selection.chosen.len();
                prop_assert!(n >= 1);
                prop_assert!(selection.total_value as i64 > selector.required_for(&target, n));
                // One input fewer would not have been enough
                let without_last = selection.total_value - selection.chosen[n - 1].value;
                prop_assert!(without_last as i64 <= selector.required_for(&target, n - 1));
            }
            Err(_) => {
                prop_assert!(total_value(&utxos) as i64 <= selector.required_for(&target, utxos.len()));
            }
        }
    }

    #[test]
    fn lock_drops_every_inscription_push(body in prop::collection::vec(any::<u8>(), 0..2_000)) {
        let record = MetaidRecord::new(Operation::Create, "/file")
            .with_content_type("application/octet-stream;binary")
            .with_body(hex::encode(&body));
        let scripts = RevealScripts::new(&record, &[2u8; 33]).unwrap();

        let chunks = chunk_body(&body);
        prop_assert!(chunks.iter().all(|c| c.len() <= MAX_CHUNK_LEN));
        prop_assert_eq!(chunks.concat(), body.clone());

        let pushes = count_pushes(&scripts.inscription).unwrap();
        prop_assert_eq!(pushes, scripts.push_count);
        let drops = decode(&scripts.lock)
            .unwrap()
            .iter()
            .filter(|i| **i == Instruction::Op(OP_DROP))
            .count();
        prop_assert_eq!(drops, pushes);
    }
}
