/// Idempotent schema, applied statement by statement at startup.
pub(super) const STATEMENTS: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS indexed_blocks (
        hash TEXT PRIMARY KEY,
        height INTEGER NOT NULL,
        previous_hash TEXT,
        time INTEGER NOT NULL,
        applied_at TEXT NOT NULL
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_indexed_blocks_height ON indexed_blocks (height)",
    r"
    CREATE TABLE IF NOT EXISTS utxos (
        txid TEXT NOT NULL,
        vout INTEGER NOT NULL,
        address TEXT NOT NULL,
        value_sats INTEGER NOT NULL,
        height INTEGER NOT NULL,
        block_hash TEXT NOT NULL,
        spent INTEGER NOT NULL DEFAULT 0,
        spent_txid TEXT,
        spent_height INTEGER,
        spent_block_hash TEXT,
        PRIMARY KEY (txid, vout)
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_utxos_address ON utxos (address, spent)",
    "CREATE INDEX IF NOT EXISTS idx_utxos_block ON utxos (block_hash)",
    "CREATE INDEX IF NOT EXISTS idx_utxos_spent_block ON utxos (spent_block_hash)",
    r"
    CREATE TABLE IF NOT EXISTS spends (
        txid TEXT NOT NULL,
        vout INTEGER NOT NULL,
        spending_txid TEXT NOT NULL,
        height INTEGER NOT NULL,
        block_hash TEXT NOT NULL,
        PRIMARY KEY (txid, vout)
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_spends_block ON spends (block_hash)",
    r"
    CREATE TABLE IF NOT EXISTS staking_rewards (
        identity_address TEXT NOT NULL,
        height INTEGER NOT NULL,
        block_hash TEXT NOT NULL,
        block_time INTEGER NOT NULL,
        txid TEXT NOT NULL,
        vout INTEGER NOT NULL,
        amount_sats INTEGER NOT NULL,
        classifier TEXT NOT NULL,
        UNIQUE (identity_address, txid, vout)
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_rewards_block ON staking_rewards (block_hash)",
    r"
    CREATE TABLE IF NOT EXISTS identities (
        address TEXT PRIMARY KEY,
        name TEXT,
        first_seen_height INTEGER,
        creation_height INTEGER,
        creation_txid TEXT,
        updated_at TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS pos_block_index (
        height INTEGER PRIMARY KEY,
        hash TEXT NOT NULL,
        is_stake INTEGER NOT NULL,
        classifier TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS scan_checkpoints (
        scanner_id TEXT PRIMARY KEY,
        height INTEGER NOT NULL,
        updated_at TEXT NOT NULL
    )
    ",
];
