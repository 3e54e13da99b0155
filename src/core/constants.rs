// src/core/constants.rs

//! String and numeric constants shared across the repository layout, the
//! distributed-lock protocol, state serialisation, and JSON-RPC messaging.

/// Separates all notifyable keys into components.
pub const KEY_SEPARATOR: &str = "/";

/// Top-level namespace segment for every clusterlib key.
pub const CLUSTERLIB: &str = "clusterlib";

/// Layout version segment; bumped only on incompatible repository changes.
pub const CLUSTERLIB_VERSION: &str = "1.0";

/// Directory of the single Root object.
pub const ROOT_DIR: &str = "root";
/// Directory of Application objects.
pub const APPLICATION_DIR: &str = "applications";
/// Directory of Group objects.
pub const GROUP_DIR: &str = "groups";
/// Directory of Node objects.
pub const NODE_DIR: &str = "nodes";
/// Directory of ProcessSlot objects.
pub const PROCESSSLOT_DIR: &str = "processSlots";
/// Directory of DataDistribution objects.
pub const DATADISTRIBUTION_DIR: &str = "distributions";
/// Directory of PropertyList objects.
pub const PROPERTYLIST_DIR: &str = "propertyLists";
/// Directory of Queue objects.
pub const QUEUE_DIR: &str = "queues";

/// Per-notifyable node holding the current-state history array.
pub const CURRENT_STATE_DIR: &str = "currentState";
/// Per-notifyable node holding the desired-state history array.
pub const DESIRED_STATE_DIR: &str = "desiredState";
/// Per-notifyable directory under which lock directories live.
pub const LOCK_DIR: &str = "locks";
/// PropertyList node holding the key-value JSON object.
pub const KEYVAL_NODE: &str = "keyVal";
/// DataDistribution node holding the marshalled shard array.
pub const SHARDS_NODE: &str = "shards";
/// ProcessSlot node holding the process info 2-tuple.
pub const PROCESSINFO_NODE: &str = "processInfo";
/// Node node holding the `[enable, maxSlots]` pair.
pub const PROCESSSLOTINFO_NODE: &str = "processSlotInfo";

/// Store path segment whose creation signals orderly shutdown.
pub const END_EVENT_NODE: &str = "endEvent";

/// User lock on a notifyable object.
pub const NOTIFYABLE_LOCK: &str = "notifyableLock";
/// User lock that denotes "ownership" (leadership) of a notifyable object.
pub const OWNERSHIP_LOCK: &str = "ownershipLock";
/// Lock that serialises manipulation of a notifyable's children.  The library
/// acquires it when creating and removing notifyables; users may too.
pub const CHILD_LOCK: &str = "childLock";

/// Marks a sequence-ephemeral child as part of the lock protocol.
pub const PARTIAL_LOCK_TAG: &str = "bid";

/// Prefix of sequenced queue-element children under a Queue's key.
pub const QUEUE_ELEMENT_PREFIX: &str = "element_";

/// Maximum accepted queue element payload, in bytes.
pub const QUEUE_ELEMENT_MAX_BYTES: usize = 1024 * 1024;

/// Reserved state key: publish time in msecs since the epoch.
pub const STATE_SET_MSECS: &str = "_setMsecs";
/// Reserved state key: publish time as a human-readable date string.
pub const STATE_SET_MSECS_AS_DATE: &str = "_setMsecsAsDate";

/// Default number of historical states retained by a publish.
pub const DEFAULT_MAX_HISTORY_SIZE: i32 = 5;

/// Defined PropertyList keys (prefix PLK) and values (prefix PLV).
pub const PLK_STATE: &str = "state";
pub const PLV_STATE_INITIAL: &str = "initial";
pub const PLV_STATE_PREPARING: &str = "preparing";
pub const PLV_STATE_RUNNING: &str = "running";
pub const PLV_STATE_READY: &str = "ready";
pub const PLV_STATE_REMOVED: &str = "removed";
pub const PLV_STATE_COMPLETED: &str = "completed";
pub const PLV_STATE_HALTING: &str = "halting";
pub const PLV_STATE_STOPPED: &str = "stopped";
pub const PLV_STATE_FAILED: &str = "failed";

/// Default PropertyList name for a notifyable.
pub const DEFAULT_PROPERTYLIST: &str = "defaultPropertyList";
/// Default recv queue name for a notifyable.
pub const DEFAULT_RECV_QUEUE: &str = "defaultRecvQueue";
/// Default response queue name for a notifyable.
pub const DEFAULT_RESP_QUEUE: &str = "defaultRespQueue";
/// Default queue for completed or unroutable RPC envelopes.
pub const DEFAULT_COMPLETED_QUEUE: &str = "defaultCompletedQueue";

/// Strings associated with predefined JSON-RPC methods.
pub const RPC_START_PROCESS: &str = "startProcess";
pub const RPC_STOP_PROCESS: &str = "stopProcess";

/// Known JSON object keys.
pub const JSON_KEY_METHOD: &str = "method";
pub const JSON_KEY_ADD_ENV: &str = "addEnv";
pub const JSON_KEY_PATH: &str = "path";
pub const JSON_KEY_COMMAND: &str = "command";
pub const JSON_KEY_RESP_QUEUE_KEY: &str = "respQueueKey";
pub const JSON_KEY_NOTIFYABLE_KEY: &str = "notifyableKey";
pub const JSON_KEY_SIGNAL: &str = "signal";
pub const JSON_KEY_TIME: &str = "time";

/*
 * All indices used for parsing repository keys.
 */
pub const CLUSTERLIB_INDEX: usize = 1;
pub const VERSION_NAME_INDEX: usize = 2;
pub const ROOT_INDEX: usize = 3;
pub const APP_INDEX: usize = 4;
pub const APP_NAME_INDEX: usize = 5;

/// Number of components in a Root key.
pub const ROOT_COMPONENTS_COUNT: usize = 4;

/// Number of components in an Application key.
pub const APP_COMPONENTS_COUNT: usize = 6;

/// Minimum components necessary to represent each respective key.
pub const DIST_COMPONENTS_MIN_COUNT: usize = 6;
pub const PROP_COMPONENTS_MIN_COUNT: usize = 6;
pub const QUEUE_COMPONENTS_MIN_COUNT: usize = 6;
pub const GROUP_COMPONENTS_MIN_COUNT: usize = 6;
pub const NODE_COMPONENTS_MIN_COUNT: usize = 6;
pub const PROCESSSLOT_COMPONENTS_MIN_COUNT: usize = 8;

/// Width of the decimal suffix the store appends to sequence nodes.
pub const SEQUENCE_NUMBER_SIZE: usize = 10;

/// Version of cached data that has never been loaded from the repository.
pub const INITIAL_VERSION: i32 = -3;
/// Version of cached data whose backing node was deleted.
pub const DELETED_VERSION: i32 = -2;
/// Version wildcard accepted by the store for unconditional writes.
pub const ANY_VERSION: i32 = -1;

/// Sentinel for "time not available" in msec-valued fields.
pub const MSECS_NOT_AVAILABLE: i64 = -1;
