use std::thread::{Builder, JoinHandle};

/// Spawns a named OS thread, falling back to the default unnamed behaviour only if the
/// underlying OS call fails (practically never, but `Builder::spawn` is fallible).
pub fn spawn_named_thread<F, T>(name: &str, f: F) -> JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Builder::new()
        .name(name.to_string())
        .spawn(f)
        .unwrap_or_else(|err| panic!("failed to spawn thread '{name}': {err}"))
}
