//! Small shared helpers used by the batch-lookup paths (ASN, rDNS,
//! multipath). Not part of the public API.

/// Run `f` over `items` using up to `max_workers` OS threads at once,
/// blocking until all complete. This is the "worker disjoint from the
/// facade's serial context" referred to throughout spec §5 — blocking
/// system calls (DNS, rDNS) are issued from these threads, never from a
/// thread that also owns a traceroute/ping socket.
pub(crate) fn run_bounded<T, F>(items: &[T], max_workers: usize, f: F)
where
    T: Sync,
    F: Fn(&T) + Sync,
{
    if items.is_empty() {
        return;
    }
    let workers = max_workers.max(1);
    let chunk_size = ((items.len() + workers - 1) / workers).max(1);
    std::thread::scope(|scope| {
        let f = &f;
        for chunk in items.chunks(chunk_size) {
            scope.spawn(move || {
                for item in chunk {
                    f(item);
                }
            });
        }
    });
}
