use tracing::{info, warn};

/// Pin the calling thread to CPU core `core`.
///
/// Missing or unknown cores are logged and ignored; frames are still produced
/// unpinned.
pub fn pin_current_thread(core: usize) -> bool {
    let Some(ids) = core_affinity::get_core_ids() else {
        warn!("Could not enumerate CPU cores, tick thread left unpinned");
        return false;
    };

    match ids.into_iter().find(|id| id.id == core) {
        Some(id) if core_affinity::set_for_current(id) => {
            info!("Tick thread pinned to core {}", core);
            true
        }
        Some(_) => {
            warn!("Failed to pin tick thread to core {}", core);
            false
        }
        None => {
            warn!("Core {} does not exist, tick thread left unpinned", core);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_to_missing_core() {
        assert!(!pin_current_thread(usize::MAX));
    }
}
