use crate::tests::helpers::*;
use crate::*;
use anyhow::Result;
use std::sync::Arc;
use std::thread;

struct Cached {
    table: TableReader,
    file: Arc<MemFile>,
    cache: Arc<LruBlockCache>,
    stats: Arc<TickerCounters>,
}

fn open_cached(built: &BuiltTable, tweak: impl FnOnce(&mut TableOptions)) -> Result<Cached> {
    let cache = Arc::new(LruBlockCache::new(1 << 20));
    let mut options = TableOptions {
        block_cache: Some(cache.clone()),
        ..TableOptions::default()
    };
    tweak(&mut options);
    let stats = Arc::new(TickerCounters::new());
    let reader_options = ReaderOptions {
        statistics: stats.clone(),
        ..ReaderOptions::default()
    };
    let file = built.file();
    let table = TableReader::open(file.clone(), built.size(), options, reader_options)?;
    Ok(Cached {
        table,
        file,
        cache,
        stats,
    })
}

fn lookup_with(table: &TableReader, ro: &ReadOptions, user_key: &[u8]) -> Result<LookupState> {
    let mut ctx = LookupContext::new(user_key);
    table.get(ro, &ikey(user_key, MAX_SEQUENCE_NUMBER), &mut ctx, false)?;
    Ok(ctx.into_state())
}

fn lookup(table: &TableReader, user_key: &[u8]) -> Result<LookupState> {
    lookup_with(table, &ReadOptions::default(), user_key)
}

// -------------------- Data blocks --------------------

#[test]
fn second_read_is_served_from_the_cache() -> Result<()> {
    let t = open_cached(&TableBuilder::default().build(&numbered_entries(12)), |_| {})?;
    assert_eq!(lookup(&t.table, b"key005")?, LookupState::Found(b"value5".to_vec()));
    let reads = t.file.read_count();
    assert_eq!(t.stats.get(Ticker::BlockCacheDataMiss), 1);
    assert_eq!(t.stats.get(Ticker::BlockCacheAdd), 1);

    assert_eq!(lookup(&t.table, b"key006")?, LookupState::Found(b"value6".to_vec()));
    assert_eq!(t.file.read_count(), reads);
    assert_eq!(t.stats.get(Ticker::BlockCacheDataHit), 1);
    assert_eq!(t.cache.len(), 1);
    assert_eq!(t.cache.pinned(), 0);
    Ok(())
}

#[test]
fn fill_cache_off_reads_without_caching() -> Result<()> {
    let t = open_cached(&TableBuilder::default().build(&numbered_entries(8)), |_| {})?;
    let ro = ReadOptions {
        fill_cache: false,
        ..ReadOptions::default()
    };
    assert_eq!(lookup_with(&t.table, &ro, b"key001")?, LookupState::Found(b"value1".to_vec()));
    assert_eq!(lookup_with(&t.table, &ro, b"key001")?, LookupState::Found(b"value1".to_vec()));
    assert!(t.cache.is_empty());
    assert_eq!(t.stats.get(Ticker::BlockCacheAdd), 0);
    Ok(())
}

#[test]
fn failed_inserts_still_return_the_block() -> Result<()> {
    let cache = Arc::new(LruBlockCache::with_strict_capacity(16, true));
    let stats = Arc::new(TickerCounters::new());
    let built = TableBuilder::default().build(&numbered_entries(8));
    let table = TableReader::open(
        built.file(),
        built.size(),
        TableOptions {
            block_cache: Some(cache.clone()),
            ..TableOptions::default()
        },
        ReaderOptions {
            statistics: stats.clone(),
            ..ReaderOptions::default()
        },
    )?;
    assert_eq!(lookup(&table, b"key002")?, LookupState::Found(b"value2".to_vec()));
    assert_eq!(stats.get(Ticker::BlockCacheAddFailures), 1);
    assert!(cache.is_empty());
    Ok(())
}

// -------------------- Cache-only reads --------------------

#[test]
fn cache_only_lookup_reports_may_exist() -> Result<()> {
    let t = open_cached(&TableBuilder::default().build(&numbered_entries(8)), |_| {})?;
    let before = t.file.read_count();
    let no_io = ReadOptions::no_io();

    assert_eq!(lookup_with(&t.table, &no_io, b"key003")?, LookupState::MayExist);
    assert_eq!(t.file.read_count(), before);

    assert_eq!(lookup(&t.table, b"key003")?, LookupState::Found(b"value3".to_vec()));
    assert_eq!(
        lookup_with(&t.table, &no_io, b"key002")?,
        LookupState::Found(b"value2".to_vec())
    );
    // Second block was never read.
    assert_eq!(lookup_with(&t.table, &no_io, b"key006")?, LookupState::MayExist);
    Ok(())
}

#[test]
fn cache_only_lookup_without_any_cache() -> Result<()> {
    let built = TableBuilder::default().build(&numbered_entries(8));
    let table = TableReader::open(
        built.file(),
        built.size(),
        TableOptions::default(),
        ReaderOptions::default(),
    )?;
    assert_eq!(
        lookup_with(&table, &ReadOptions::no_io(), b"key003")?,
        LookupState::MayExist
    );
    Ok(())
}

#[test]
fn cache_only_iterator_is_incomplete() -> Result<()> {
    let t = open_cached(&TableBuilder::default().build(&numbered_entries(8)), |_| {})?;
    let mut it = t.table.new_iterator(&ReadOptions::no_io(), false);
    it.seek_to_first();
    assert!(!it.valid());
    assert!(it.status().unwrap_err().is_incomplete());
    Ok(())
}

#[test]
fn cache_only_index_miss_is_incomplete() -> Result<()> {
    let built = TableBuilder::default().build(&numbered_entries(8));
    let cache = Arc::new(LruBlockCache::new(1 << 20));
    let options = TableOptions {
        block_cache: Some(cache.clone()),
        cache_index_and_filter_blocks: true,
        ..TableOptions::default()
    };
    let lazy = ReaderOptions {
        prefetch_index_and_filter: false,
        ..ReaderOptions::default()
    };
    let table = TableReader::open(built.file(), built.size(), options, lazy)?;
    assert!(cache.is_empty());

    let mut ctx = LookupContext::new("key001");
    let err = table
        .get(
            &ReadOptions::no_io(),
            &ikey(b"key001", MAX_SEQUENCE_NUMBER),
            &mut ctx,
            false,
        )
        .unwrap_err();
    assert!(err.is_incomplete());

    assert_eq!(lookup(&table, b"key001")?, LookupState::Found(b"value1".to_vec()));
    assert_eq!(
        lookup_with(&table, &ReadOptions::no_io(), b"key000")?,
        LookupState::Found(b"value0".to_vec())
    );
    Ok(())
}

#[test]
fn cache_only_lookup_uses_the_cached_index_and_filter() -> Result<()> {
    let builder = TableBuilder {
        filter: FilterKind::Full,
        ..Default::default()
    };
    let built = builder.build(&numbered_entries(8));
    let t = open_cached(&built, |o| {
        o.cache_index_and_filter_blocks = true;
        o.filter_policy = Some(FilterPolicy::default());
    })?;
    // Index and filter were inserted while opening.
    assert_eq!(t.cache.len(), 2);
    assert!(!t.table.filter_block_preloaded());

    assert_eq!(
        lookup_with(&t.table, &ReadOptions::no_io(), b"key004")?,
        LookupState::MayExist
    );
    assert!(t.stats.get(Ticker::BlockCacheFilterHit) >= 1);
    assert_eq!(lookup(&t.table, b"key004")?, LookupState::Found(b"value4".to_vec()));
    assert_eq!(t.cache.pinned(), 0);
    Ok(())
}

#[test]
fn index_lease_is_held_while_iterating() -> Result<()> {
    let t = open_cached(&TableBuilder::default().build(&numbered_entries(8)), |o| {
        o.cache_index_and_filter_blocks = true;
    })?;
    {
        let mut it = t.table.new_iterator(&ReadOptions::default(), false);
        it.seek_to_first();
        assert!(it.valid());
        assert!(t.cache.pinned() >= 1);
    }
    assert_eq!(t.cache.pinned(), 0);
    Ok(())
}

// -------------------- Compressed cache --------------------

#[test]
fn compressed_cache_hit_is_promoted_without_io() -> Result<()> {
    let builder = TableBuilder {
        compression: CompressionType::Lz4,
        ..Default::default()
    };
    let built = builder.build(&numbered_entries(12));
    let compressed = Arc::new(LruBlockCache::new(1 << 20));

    let open = |primary: Arc<LruBlockCache>, stats: Arc<TickerCounters>| {
        let file = Arc::new(MemFile::new(built.bytes.clone()).with_unique_id(b"table-7".to_vec()));
        let options = TableOptions {
            block_cache: Some(primary),
            block_cache_compressed: Some(compressed.clone()),
            ..TableOptions::default()
        };
        let reader_options = ReaderOptions {
            statistics: stats,
            ..ReaderOptions::default()
        };
        TableReader::open(file.clone(), built.size(), options, reader_options).map(|t| (t, file))
    };

    let first_stats = Arc::new(TickerCounters::new());
    let (first, _) = open(Arc::new(LruBlockCache::new(1 << 20)), first_stats.clone())?;
    assert_eq!(lookup(&first, b"key001")?, LookupState::Found(b"value1".to_vec()));
    assert_eq!(first_stats.get(Ticker::BlockCacheCompressedMiss), 1);
    assert_eq!(first_stats.get(Ticker::BlockCacheCompressedAdd), 1);
    assert_eq!(compressed.len(), 1);

    // A second reader with a cold primary cache finds the compressed copy.
    let primary = Arc::new(LruBlockCache::new(1 << 20));
    let second_stats = Arc::new(TickerCounters::new());
    let (second, file) = open(primary.clone(), second_stats.clone())?;
    let reads = file.read_count();
    assert_eq!(lookup(&second, b"key002")?, LookupState::Found(b"value2".to_vec()));
    assert_eq!(file.read_count(), reads);
    assert_eq!(second_stats.get(Ticker::BlockCacheCompressedHit), 1);
    assert_eq!(primary.len(), 1);
    assert_eq!(primary.pinned(), 0);
    assert_eq!(compressed.pinned(), 0);
    Ok(())
}

#[test]
fn uncompressed_blocks_skip_the_compressed_cache() -> Result<()> {
    let compressed = Arc::new(LruBlockCache::new(1 << 20));
    let t = open_cached(&TableBuilder::default().build(&numbered_entries(8)), |o| {
        o.block_cache_compressed = Some(compressed.clone());
    })?;
    assert_eq!(lookup(&t.table, b"key001")?, LookupState::Found(b"value1".to_vec()));
    assert!(compressed.is_empty());
    assert_eq!(t.cache.len(), 1);
    Ok(())
}

// -------------------- Sharing --------------------

#[test]
fn tables_sharing_a_cache_keep_their_own_blocks() -> Result<()> {
    let cache = Arc::new(LruBlockCache::new(1 << 20));
    let options = TableOptions {
        block_cache: Some(cache.clone()),
        ..TableOptions::default()
    };
    let a = TableBuilder::default().build(&[(ikey(b"k", 1), b"from-a".to_vec())]);
    let b = TableBuilder::default().build(&[(ikey(b"k", 1), b"from-b".to_vec())]);
    let ta = TableReader::open(a.file(), a.size(), options.clone(), ReaderOptions::default())?;
    let tb = TableReader::open(b.file(), b.size(), options, ReaderOptions::default())?;

    assert_eq!(lookup(&ta, b"k")?, LookupState::Found(b"from-a".to_vec()));
    assert_eq!(lookup(&tb, b"k")?, LookupState::Found(b"from-b".to_vec()));
    assert_eq!(cache.len(), 2);
    Ok(())
}

#[test]
fn concurrent_readers_share_blocks_and_release_every_lease() -> Result<()> {
    let builder = TableBuilder {
        filter: FilterKind::Full,
        ..Default::default()
    };
    let built = builder.build(&numbered_entries(64));
    let t = open_cached(&built, |o| {
        o.cache_index_and_filter_blocks = true;
        o.filter_policy = Some(FilterPolicy::default());
    })?;

    thread::scope(|s| {
        for worker in 0..8 {
            let table = t.table.clone();
            s.spawn(move || {
                for round in 0..4 {
                    for i in 0..64 {
                        let i = (i + worker * 8 + round) % 64;
                        let key = format!("key{:03}", i);
                        let state = lookup(&table, key.as_bytes()).unwrap();
                        assert_eq!(state, LookupState::Found(format!("value{}", i).into_bytes()));
                    }
                    let mut it = table.new_iterator(&ReadOptions::default(), false);
                    it.seek_to_first();
                    let mut n = 0;
                    while it.valid() {
                        n += 1;
                        it.next();
                    }
                    assert_eq!(n, 64);
                }
            });
        }
    });

    assert_eq!(t.cache.pinned(), 0);
    // Index, filter and sixteen data blocks, each cached once.
    assert_eq!(t.cache.len(), 2 + built.data_blocks.len());
    Ok(())
}
