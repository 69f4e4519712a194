use std::sync::Once;

use heapscope_config::{init_tracing_with_config, ProbeConfig};
use heapscope_runtime::guard::in_guarded_scope;

static PANIC_HOOK: Once = Once::new();

/// Initialize structured logging and install the process panic hook.
///
/// Panics raised inside a guarded probe are about to be intercepted and
/// reported as `#INVALID`, so the hook stays quiet for them. Everything else
/// is logged through `tracing` before the previous hook runs.
pub fn init(config: &ProbeConfig) {
    init_tracing_with_config(config);
    install_panic_hook();
}

pub fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if in_guarded_scope() {
                return;
            }
            let location = info.location().map(|loc| loc.to_string());
            let message = info
                .payload()
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| info.payload().downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_owned());
            tracing::error!(
                target: "heapscope.panic",
                message = %message,
                location = location.as_deref().unwrap_or("<unknown>"),
                "panic"
            );
            previous(info);
        }));
    });
}
