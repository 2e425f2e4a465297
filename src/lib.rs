pub mod core;
pub mod codec;
pub mod memory;
pub mod storage;
pub mod store;

/*
┌────────────────────────────────────────────────────────────────────────────────────────────┐
│                          REFDATA STORE STRUCT ARCHITECTURE                                  │
└────────────────────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────────── ROUTING LAYER ──────────────────────────────────────────┐
│                                                                                              │
│  ┌────────────────────────────────────────────────────────────────────────────────────┐    │
│  │                        struct DelegatingRefDataStore                                │    │
│  │  ┌──────────────────────────────────────────────────────────────────────────────┐ │    │
│  │  │ feed_lookup: Arc<dyn FeedLookup>     // stream id -> feed name               │ │    │
│  │  │ legacy: Option<Arc<RefDataOffHeapStore>>        // pre-split data            │ │    │
│  │  │ feed_stores: RwLock<HashMap<String, Arc<RefDataOffHeapStore>>>               │ │    │
│  │  │ migrations: Mutex<HashMap<u64, Arc<OnceLock<MigrationOutcome>>>>             │ │    │
│  │  └──────────────────────────────────────────────────────────────────────────────┘ │    │
│  └────────────────────────────────────────────────────────────────────────────────────┘    │
│        │ get_effective_store(def) ── first use ──> migrate_stream(legacy, dest, id)         │
└────────┼─────────────────────────────────────────────────────────────────────────────────────┘
         ▼
┌──────────────────────────────────── STORE LAYER ────────────────────────────────────────────┐
│                                                                                              │
│  ┌────────────────────────────────────────────────────────────────────────────────────┐    │
│  │                          struct RefDataOffHeapStore                                 │    │
│  │  ┌──────────────────────────────────────────────────────────────────────────────┐ │    │
│  │  │ db: redb::Database                  // one writer, many snapshot readers     │ │    │
│  │  │ map_uid_store: MapDefinitionUidStore                                         │ │    │
│  │  │ key_value_db: KeyValueStoreDb       range_db: RangeStoreDb                   │ │    │
│  │  │ value_store: ValueStore             processing_info_db: ProcessingInfoDb     │ │    │
│  │  │ stream_locks: Mutex<HashMap<RefStreamDefinition, Arc<ReentrantMutex<()>>>>   │ │    │
│  │  │ terminator: TaskTerminator          buffer_pool: Arc<ByteBufferPool>         │ │    │
│  │  └──────────────────────────────────────────────────────────────────────────────┘ │    │
│  └────────────────────────────────────────────────────────────────────────────────────┘    │
│                                                                                              │
│  ┌────────────────────────┐  ┌─────────────────────────┐  ┌────────────────────────┐      │
│  │ struct RefDataLoader   │  │ purge (impl on store)   │  │ struct RefDataValue-   │      │
│  │ • BatchingWriteTxn     │  │ • purge_old_data()      │  │   Proxy                │      │
│  │ • New → Initialised →  │  │ • purge(id, part)       │  │ • location resolved    │      │
│  │   Staged → Completed   │  │ • batched deletes       │  │ • bytes read later     │      │
│  │ • LoaderStats          │  │ • PurgeCounts           │  │   in a new read txn    │      │
│  └────────────────────────┘  └─────────────────────────┘  └────────────────────────┘      │
└──────────────────────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────────── TABLE LAYER ────────────────────────────────────────────┐
│                                                                                              │
│   MapUidForward   [stream def][map name]      ──> [uid]                                      │
│   MapUidReverse   [uid]                       ──> [stream def][map name]                     │
│   KeyValueStore   [uid][key utf8]             ──> ValueStoreKey                              │
│   RangeStore      [uid][from u64][to u64]     ──> ValueStoreKey                              │
│   ValueStore      ValueStoreKey               ──> [type id][payload]                         │
│   ValueStoreMeta  ValueStoreKey               ──> [type id][ref count u32]                   │
│   ProcessingInfo  [stream def]                ──> bincode(RefDataProcessingInfo)             │
│                                                                                              │
│   ValueStoreKey = [crc32 of type id + payload][collision id u16]                             │
└──────────────────────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────────── LOOKUP FLOW ────────────────────────────────────────────┐
│                                                                                              │
│   get_value(map, key)                                                                        │
│       │                                                                                      │
│       ├─> MapUidForward: map ──> uid               (absent: None)                           │
│       ├─> KeyValueStore: [uid][key] ──> vk         (map holds keys)                         │
│       ├─> RangeStore: floor([uid][key][MAX]) ──> (range, vk), range contains key            │
│       └─> ValueStore: vk ──> RefDataValue                                                   │
│                                                                                              │
│   Load:  map uid ──> entry ──> value key ──> value bytes  (one write txn per batch)         │
│   Purge: processing info ──> maps ──> entries ──> deref/delete values ──> uid pair ──> info │
└──────────────────────────────────────────────────────────────────────────────────────────────┘
*/
