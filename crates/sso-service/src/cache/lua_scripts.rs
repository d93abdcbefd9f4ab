//! Lua scripts for atomic cache operations.
//!
//! Redis runs each script to completion without interleaving other commands,
//! which gives single-key compare-and-swap and read-and-delete semantics.

/// Compare-and-swap with TTL.
///
/// Arguments:
/// - KEYS[1]: Key (e.g., `session:{id}`)
/// - ARGV[1]: Expected current value
/// - ARGV[2]: New value
/// - ARGV[3]: TTL in seconds
///
/// Returns:
/// - 1: Swapped (or the value already equals ARGV[2], i.e. a retried swap)
/// - 0: Mismatch, nothing written
/// - -1: Key missing
pub const COMPARE_AND_SWAP: &str = r#"
local current = redis.call('GET', KEYS[1])

if current == false then
    return -1
end

if current == ARGV[2] then
    -- Already applied by an earlier attempt whose reply was lost
    return 1
end

if current ~= ARGV[1] then
    return 0
end

redis.call('SET', KEYS[1], ARGV[2], 'EX', tonumber(ARGV[3]))
return 1
"#;

/// Read and delete in one step.
///
/// Arguments:
/// - KEYS[1]: Key (e.g., `fedstate:{state}`)
///
/// Returns the stored value, or nil if the key is missing.
pub const TAKE: &str = r#"
local value = redis.call('GET', KEYS[1])

if value then
    redis.call('DEL', KEYS[1])
end

return value
"#;
