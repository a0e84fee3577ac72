use std::sync::Arc;

use spatia_core::config::{AppConfig, StorageBackend};
use spatia_core::id::RefId;
use spatia_core::traits::Storage;
use spatia_memory::RootRegistry;

struct CheckResult {
    label: String,
    ok: bool,
    detail: String,
}

pub fn run_doctor(config: &AppConfig, storage: &Arc<dyn Storage>) -> bool {
    let registry = RootRegistry::new(storage.clone());
    let checks = vec![
        check_storage(config),
        check_root(storage, "System root", registry.system_root()),
        check_root(storage, "Public root", registry.public_root()),
        check_budgets(config),
    ];

    let mut ok_count = 0;
    let mut fail_count = 0;

    for check in &checks {
        let icon = if check.ok { "[OK]" } else { "[!!]" };
        println!("  {} {}: {}", icon, check.label, check.detail);
        if check.ok {
            ok_count += 1;
        } else {
            fail_count += 1;
        }
    }

    println!();
    println!("  {} passed, {} issues found", ok_count, fail_count);
    fail_count == 0
}

fn check_storage(config: &AppConfig) -> CheckResult {
    match config.storage.backend {
        StorageBackend::Memory => CheckResult {
            label: "Storage".into(),
            ok: true,
            detail: "In-memory backend (nothing survives exit)".into(),
        },
        StorageBackend::Sqlite => {
            let path = config.storage_path();
            CheckResult {
                label: "Storage".into(),
                ok: path.exists(),
                detail: if path.exists() {
                    format!("SQLite database at {}", path.display())
                } else {
                    format!("{} does not exist yet", path.display())
                },
            }
        }
    }
}

fn check_root(storage: &Arc<dyn Storage>, label: &str, id: RefId) -> CheckResult {
    let (ok, detail) = match storage.find_by_id(&id) {
        Ok(Some(anchor)) if anchor.architype.is_root() => (true, format!("{} present", id)),
        Ok(Some(anchor)) => (
            false,
            format!("{} holds a {}", id, anchor.architype.type_name()),
        ),
        Ok(None) => (false, format!("{} missing (run `spatia bootstrap`)", id)),
        Err(e) => (false, format!("{} unreadable: {}", id, e)),
    };
    CheckResult {
        label: label.into(),
        ok,
        detail,
    }
}

fn check_budgets(config: &AppConfig) -> CheckResult {
    let runtime = &config.runtime;
    if runtime.max_steps == 0 {
        return CheckResult {
            label: "Walker budgets".into(),
            ok: false,
            detail: "max_steps = 0 faults every walker after its start node".into(),
        };
    }
    let timeout = match runtime.walker_timeout_ms {
        0 => "no timeout".to_string(),
        ms => format!("{}ms timeout", ms),
    };
    CheckResult {
        label: "Walker budgets".into(),
        ok: true,
        detail: format!("{} steps, {}", runtime.max_steps, timeout),
    }
}
