//! Property tests for the codec round-trip and the hotspot cap invariant.

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;

use recall_cache::keys::{ResourceKind, HOTSPOT_CAP};
use recall_cache::{codec, CacheConfig, HotspotTracker, InMemoryCache, TieredCache};

proptest! {
    /// decode(encode(v)) == v for strings of any size, including sizes
    /// straddling the compression threshold.
    #[test]
    fn codec_roundtrip_strings(value in proptest::string::string_regex(".{0,3000}").unwrap()) {
        let stored = codec::encode(&value).unwrap();
        let back: String = codec::decode(&stored).unwrap();
        prop_assert_eq!(value, back);
    }

    /// Round-trips hold for structured maps too, compressed or not.
    #[test]
    fn codec_roundtrip_maps(entries in proptest::collection::hash_map("[a-z]{1,12}", ".{0,200}", 0..40)) {
        let stored = codec::encode(&entries).unwrap();
        let back: HashMap<String, String> = codec::decode(&stored).unwrap();
        prop_assert_eq!(entries, back);
    }

    /// The payload tag is unambiguous: whatever was stored decodes by
    /// sniffing alone, regardless of which side of the threshold it fell on.
    #[test]
    fn codec_tag_detection_is_consistent(len in 0usize..2048) {
        let value = "z".repeat(len);
        let stored = codec::encode(&value).unwrap();
        let json_len = serde_json::to_vec(&value).unwrap().len();
        prop_assert_eq!(codec::is_compressed(&stored), json_len > codec::COMPRESSION_THRESHOLD);
    }

    /// After any sequence of recorded batches, a ranking never exceeds the
    /// 1000-member cap.
    #[test]
    fn hotspot_ranking_never_exceeds_cap(
        batches in proptest::collection::vec((0u32..2000, 0u64..100_000), 1..1200)
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async move {
            let cache = Arc::new(InMemoryCache::new());
            let tracker = HotspotTracker::new(cache.clone(), &CacheConfig::default());

            for (id, score) in batches {
                tracker
                    .record_batch(ResourceKind::KnowledgePoint, &id.to_string(), score as f64)
                    .await
                    .unwrap();
            }

            let len = cache.sorted_set_len("hotspot:kp:daily").await.unwrap();
            assert!(len <= HOTSPOT_CAP as u64, "cap exceeded: {len}");
        });
    }
}
