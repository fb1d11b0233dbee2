//! Property tests for temporal view reconstruction
//!
//! For any batching of history into level-1 distillations, the rebuilt view
//! must stay in strict temporal order and cover every message exactly once
//! (each message appears raw, or falls inside exactly one distilled range).

use memstore::{MessageKind, Store, ViewItem};
use proptest::prelude::*;
use tempfile::tempdir;

fn covers(item: &ViewItem, id: &str) -> bool {
    match item {
        ViewItem::Distilled(d) => d.range_start_id.as_str() <= id && id <= d.range_end_id.as_str(),
        ViewItem::Raw(m) => m.id == id,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn view_partitions_history(
        msg_count in 5usize..60,
        batch in 2usize..10,
        budget in 1usize..200,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async move {
            let temp = tempdir().unwrap();
            let store = Store::open_default(temp.path().join("agent.db")).await.unwrap();
            let log = store.temporal();

            let ids: Vec<String> = (0..msg_count)
                .map(|i| log.append(MessageKind::User, &format!("word {i}")).unwrap())
                .collect();

            // Distill complete batches off the front, leaving a tail
            let mut start = 0;
            while start + batch <= msg_count.saturating_sub(1) {
                let end = start + batch - 1;
                log.insert_distillation(1, &ids[start], &ids[end], "s").unwrap();
                start = end + 1;
            }

            let view = log.build_view(budget, |t| t.split_whitespace().count()).unwrap();

            // Strict temporal order of item starts
            let starts: Vec<&str> = view
                .items
                .iter()
                .map(|i| match i {
                    ViewItem::Distilled(d) => d.range_start_id.as_str(),
                    ViewItem::Raw(m) => m.id.as_str(),
                })
                .collect();
            let mut sorted = starts.clone();
            sorted.sort();
            prop_assert_eq!(&starts, &sorted);

            // Every message is covered by exactly one view item
            for id in &ids {
                let n = view.items.iter().filter(|item| covers(item, id)).count();
                prop_assert_eq!(n, 1, "message {} covered {} times", id, n);
            }
            Ok(())
        })?;
    }
}
