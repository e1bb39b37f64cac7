use log::warn;

/// Runs `action` on a dedicated rayon pool so fan-out width stays bounded by
/// `threads` no matter how many items are dispatched.
pub fn with_fetch_pool<T>(threads: usize, action: impl FnOnce() -> T + Send) -> T
where
    T: Send,
{
    match rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|idx| format!("fetch-{idx}"))
        .build()
    {
        Ok(pool) => pool.install(action),
        Err(err) => {
            warn!("fetch pool build failed, using global pool: {err}");
            action()
        }
    }
}
