/// Property-based tests for the ledger using proptest
///
/// These tests verify cursor encoding and the running-balance invariant
/// across randomly generated operation sequences.
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::sync::Arc;
use wallet_ledger::{
    Currency, Cursor, EntryQuery, LedgerConfig, LedgerEngine, LedgerError, MemoryLedgerStore,
    PackageCatalog, WagerAmounts,
};

#[derive(Debug, Clone)]
enum Op {
    Purchase(&'static str),
    Wager(WagerAmounts),
    Redeem(i64),
}

// Strategy to generate one mutation, biased toward debits that can fail
fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        1 => prop::sample::select(vec!["starter_10k", "grinder_50k", "nope"]).prop_map(Op::Purchase),
        4 => (0i64..20_000, 0i64..20_000, 0i64..40, 0i64..40).prop_map(
            |(stake_gold, payout_gold, stake_sweeps, payout_sweeps)| Op::Wager(WagerAmounts {
                stake_gold,
                payout_gold,
                stake_sweeps,
                payout_sweeps,
            })
        ),
        2 => (-5i64..60).prop_map(Op::Redeem),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn cursor_round_trips(id in 1i64..i64::MAX, secs in 0i64..4_000_000_000, nanos in 0u32..1_000_000_000) {
        let created_at = Utc.timestamp_opt(secs, nanos).unwrap();
        let token = Cursor::new(id, created_at).encode();

        let decoded = Cursor::decode(&token).unwrap();
        prop_assert_eq!(decoded.id, id);
        prop_assert_eq!(decoded.created_at, created_at);
        prop_assert_eq!(decoded.encode(), token);
    }

    #[test]
    fn garbage_cursor_is_rejected_not_panicking(token in "[A-Za-z0-9_-]{0,40}") {
        if let Err(err) = Cursor::decode(&token) {
            prop_assert!(matches!(err, LedgerError::InvalidCursor(_)));
        }
    }

    #[test]
    fn replayed_log_never_goes_negative(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let rt = runtime();
        rt.block_on(async {
            let store = MemoryLedgerStore::new();
            let user_id = store.create_user("prop").id;
            let engine = LedgerEngine::new(
                Arc::new(store.clone()),
                Arc::new(PackageCatalog::standard()),
                LedgerConfig::default(),
            );

            for (i, op) in ops.iter().enumerate() {
                let key = format!("op-{i}");
                let result = match op {
                    Op::Purchase(code) => engine.purchase(user_id, code, &key).await.map(|_| ()),
                    Op::Wager(amounts) => engine.wager(user_id, *amounts, &key).await.map(|_| ()),
                    Op::Redeem(amount) => engine.redeem(user_id, *amount, &key).await.map(|_| ()),
                };
                if let Err(err) = result {
                    prop_assert!(matches!(
                        err,
                        LedgerError::InsufficientFunds { .. }
                            | LedgerError::InvalidInput(_)
                            | LedgerError::InvalidPackage(_)
                    ), "unexpected error: {:?}", err);
                }
            }

            let page = engine
                .list_entries(user_id, EntryQuery { limit: Some(100), ..Default::default() })
                .await
                .unwrap();
            let mut all = page.items;
            let mut cursor = page.next_cursor;
            while let Some(token) = cursor {
                let page = engine
                    .list_entries(user_id, EntryQuery { cursor: Some(token), limit: Some(100), ..Default::default() })
                    .await
                    .unwrap();
                all.extend(page.items);
                cursor = page.next_cursor;
            }

            let view = engine.get_user_with_balances(user_id).await.unwrap();
            for currency in Currency::ALL {
                let mut balance = 0i64;
                for entry in all.iter().rev().filter(|e| e.currency == currency) {
                    prop_assert!(entry.amount > 0);
                    balance += entry.kind.signed(entry.amount);
                    prop_assert!(balance >= 0);
                    prop_assert_eq!(entry.balance_after, balance);
                }
                prop_assert_eq!(view.balances.get(currency), balance);
            }
            Ok(())
        })?;
    }
}
