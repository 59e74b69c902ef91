// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Host wiring: startup modules, realms, hooks and settings changes

mod support;

use parking_lot::Mutex;
use spacey_modules::startup::LOAD_DELAY;
use spacey_modules::{HookCall, ModuleError, Settings, Value};
use std::sync::Arc;
use std::time::Duration;
use support::{Fixture, require};

fn startup(ids: &[&str], auto_reload: bool) -> Settings {
    Settings {
        startup_modules: ids.iter().map(|id| id.to_string()).collect(),
        auto_reload_startup_modules: auto_reload,
        ..support::settings()
    }
}

mod startup_modules {
    use super::*;

    #[tokio::test]
    async fn test_startup_modules_run_when_the_host_starts() {
        let fixture = Fixture::with_settings(
            &[
                ("boot.js", "export default fn booted"),
                ("other.js", "module.exports = fn other"),
            ],
            startup(&["boot.js", "other.js"], true),
        )
        .await;
        assert_eq!(fixture.evaluator.count("booted"), 1);
        assert_eq!(fixture.evaluator.count("other"), 1);
        assert_eq!(fixture.host.startup().loaded(), vec!["boot.js", "other.js"]);
    }

    #[tokio::test]
    async fn test_failing_startup_module_does_not_stop_siblings() {
        let fixture = Fixture::with_settings(
            &[
                ("bad.js", "throw broken"),
                ("plain.js", "module.exports = {\"a\": 1}"),
                ("boot.js", "export default fn booted"),
            ],
            startup(&["bad.js", "plain.js", "boot.js", "missing.js"], true),
        )
        .await;
        assert_eq!(fixture.evaluator.count("booted"), 1);
        assert_eq!(
            fixture.host.startup().loaded(),
            vec!["bad.js", "boot.js", "missing.js", "plain.js"]
        );
    }

    #[tokio::test]
    async fn test_load_reports_newly_requested_modules() {
        let fixture = Fixture::new(&[("boot.js", "export default fn booted")]).await;
        let startup = fixture.host.startup();
        let ids = vec!["boot.js".to_string()];
        assert!(startup.load(Duration::ZERO, &ids).await);
        assert!(!startup.load(Duration::ZERO, &ids).await);
        assert_eq!(fixture.evaluator.count("booted"), 1);

        assert!(!startup.reload(Duration::ZERO, &ids).await);
        assert_eq!(fixture.evaluator.count("booted"), 2);

        assert!(startup.unload(&ids));
        assert!(!startup.unload(&ids));
        assert!(startup.requested().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_changed_startup_module_is_reloaded() {
        let fixture = Fixture::with_settings(
            &[("boot.js", "export default fn booted")],
            startup(&["boot.js"], true),
        )
        .await;
        fixture.write("boot.js", "export default fn rebooted").await;
        assert_eq!(fixture.evaluator.count("rebooted"), 0);

        tokio::time::sleep(LOAD_DELAY * 2).await;
        assert_eq!(fixture.evaluator.count("booted"), 1);
        assert_eq!(fixture.evaluator.count("rebooted"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_bursts_reload_once() {
        let fixture = Fixture::with_settings(
            &[("boot.js", "export default fn v1")],
            startup(&["boot.js"], true),
        )
        .await;
        fixture.write("boot.js", "export default fn v2").await;
        tokio::time::sleep(LOAD_DELAY / 2).await;
        fixture.write("boot.js", "export default fn v3").await;

        tokio::time::sleep(LOAD_DELAY * 3).await;
        assert_eq!(fixture.evaluator.count("v2"), 0);
        assert_eq!(fixture.evaluator.count("v3"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_changed_startup_module_is_unloaded_without_auto_reload() {
        let fixture = Fixture::with_settings(
            &[("boot.js", "export default fn booted")],
            startup(&["boot.js"], false),
        )
        .await;
        assert_eq!(fixture.host.startup().loaded(), vec!["boot.js"]);

        fixture.write("boot.js", "export default fn rebooted").await;
        tokio::time::sleep(LOAD_DELAY * 2).await;
        assert!(fixture.host.startup().requested().is_empty());
        assert_eq!(fixture.evaluator.count("rebooted"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_changes_load_and_unload() {
        let fixture = Fixture::with_settings(
            &[
                ("one.js", "export default fn one"),
                ("two.js", "export default fn two"),
            ],
            startup(&["one.js"], true),
        )
        .await;
        fixture
            .host
            .apply_settings(startup(&["two.js"], true))
            .await
            .unwrap();
        assert_eq!(fixture.evaluator.count("two"), 0);

        tokio::time::sleep(LOAD_DELAY * 2).await;
        assert_eq!(fixture.evaluator.count("one"), 1);
        assert_eq!(fixture.evaluator.count("two"), 1);
        assert_eq!(fixture.host.startup().requested(), vec!["two.js"]);
        assert_eq!(fixture.host.startup().loaded(), vec!["two.js"]);
    }

    #[tokio::test]
    async fn test_enabling_auto_reload_loads_immediately() {
        let fixture = Fixture::with_settings(
            &[("boot.js", "export default fn booted")],
            startup(&["boot.js"], false),
        )
        .await;
        fixture.host.startup().unload(&["boot.js".to_string()]);

        fixture
            .host
            .apply_settings(startup(&["boot.js"], true))
            .await
            .unwrap();
        assert_eq!(fixture.evaluator.count("booted"), 2);
    }
}

mod realms {
    use super::*;

    #[tokio::test]
    async fn test_realms_have_separate_caches() {
        let fixture = Fixture::new(&[("who.js", "tick who\nmodule.exports = app")]).await;
        let (realm, second) = fixture.host.create_realm(Value::from("second"));

        assert_eq!(require(&fixture.require(), "who.js").unwrap(), Value::Undefined);
        assert_eq!(require(&second, "who.js").unwrap(), Value::from("second"));
        assert_eq!(fixture.evaluator.count("who"), 2);
        assert_eq!(fixture.host.requires().len(), 2);

        assert!(fixture.host.teardown_realm(realm));
        assert!(!fixture.host.teardown_realm(realm));
        assert!(fixture.host.requires().get(realm).is_none());
    }

    #[tokio::test]
    async fn test_renaming_require_keeps_listeners_and_app() {
        let fixture = Fixture::new(&[("a.js", "tick a")]).await;
        let (realm, before) = fixture.host.create_realm(Value::from("app"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        before.on_invalidate().listen(move |id: &String| sink.lock().push(id.clone()));

        fixture
            .host
            .apply_settings(Settings {
                require_name: "load".to_string(),
                ..support::settings()
            })
            .await
            .unwrap();
        let after = fixture.host.requires().get(realm).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.app(), &Value::from("app"));

        require(&after, "a.js").unwrap();
        after.invalidate_all();
        assert_eq!(*seen.lock(), vec!["a.js".to_string()]);
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let fixture = Fixture::new(&[("a.js", "tick a")]).await;
        let realm = fixture.host.main_realm();
        require(&fixture.require(), "a.js").unwrap();
        assert!(fixture.host.clear_cache(realm));
        require(&fixture.require(), "a.js").unwrap();
        assert_eq!(fixture.evaluator.count("a"), 2);

        let (other, _) = fixture.host.create_realm(Value::Undefined);
        fixture.host.teardown_realm(other);
        assert!(!fixture.host.clear_cache(other));
    }
}

mod hooks {
    use super::*;

    #[tokio::test]
    async fn test_hooked_calls_resolve_from_the_note_directory() {
        let fixture = Fixture::new(&[
            ("notes/daily/helper.js", "exports.value = 7"),
            ("notes/daily/today.md", "# Today"),
        ])
        .await;
        let loader = fixture.require();
        let call = HookCall {
            point: "preview",
            source_path: Some("notes/daily/today.md"),
        };

        let disposer = fixture.host.intercept_cwd("preview", fixture.host.main_realm());
        let exports = fixture
            .host
            .hooks()
            .run(call, || require(&loader, "./helper.js"))
            .unwrap();
        assert_eq!(exports.get("value"), Value::from(7));
        assert_eq!(loader.context(), Default::default());

        assert!(disposer.dispose());
        let result = fixture.host.hooks().run(call, || require(&loader, "./helper.js"));
        assert!(matches!(result, Err(ModuleError::ModuleNotFound(_))));
    }

    #[tokio::test]
    async fn test_other_hook_points_are_untouched() {
        let fixture = Fixture::new(&[("notes/helper.js", "exports.value = 7")]).await;
        let loader = fixture.require();
        let _disposer = fixture.host.intercept_cwd("preview", fixture.host.main_realm());
        let call = HookCall {
            point: "render",
            source_path: Some("notes/page.md"),
        };
        let result = fixture.host.hooks().run(call, || require(&loader, "./helper.js"));
        assert!(result.is_err());
    }
}

mod settings_changes {
    use super::*;

    #[tokio::test]
    async fn test_code_block_languages_reload_markdown_modules() {
        let fixture = Fixture::new(&[("note.md", "```js\nmodule.exports = 1\n```")]).await;
        let loader = fixture.require();
        assert_eq!(require(&loader, "note.md").unwrap(), Value::from(1));

        fixture
            .host
            .apply_settings(Settings {
                markdown_code_block_languages_to_load: vec!["TS".to_string()],
                ..support::settings()
            })
            .await
            .unwrap();
        assert!(!loader.is_cached("note.md"));
        let exports = require(&loader, "note.md").unwrap();
        assert!(exports.as_object().is_some());
    }

    #[tokio::test]
    async fn test_preloading_rules_limit_sync_require() {
        let fixture = Fixture::new(&[("a.js", "exports.a = 1")]).await;
        let loader = fixture.require();
        fixture
            .host
            .apply_settings(Settings {
                preloading_rules: vec![r"+/\.md$/u".to_string()],
                ..support::settings()
            })
            .await
            .unwrap();
        assert!(matches!(require(&loader, "a.js"), Err(ModuleError::ModuleNotFound(_))));
    }

    #[tokio::test]
    async fn test_invalid_settings_are_rejected() {
        let fixture = Fixture::new(&[]).await;
        let result = fixture
            .host
            .apply_settings(Settings {
                import_timeout: -1.0,
                ..support::settings()
            })
            .await;
        assert!(matches!(result, Err(ModuleError::Config(_))));
        assert_eq!(fixture.host.settings().read().import_timeout, 10.0);
    }
}

mod vault_changes {
    use super::*;

    #[tokio::test]
    async fn test_renamed_module_moves() {
        let fixture = Fixture::new(&[("old.js", "exports.a = 1")]).await;
        let loader = fixture.require();
        require(&loader, "old.js").unwrap();

        fixture.rename("old.js", "new.js").await;
        assert!(!loader.is_cached("old.js"));
        assert!(matches!(require(&loader, "old.js"), Err(ModuleError::ModuleNotFound(_))));
        assert_eq!(require(&loader, "new.js").unwrap().get("a"), Value::from(1));
    }

    #[tokio::test]
    async fn test_removed_module_is_gone() {
        let fixture = Fixture::new(&[("gone.js", "exports.a = 1")]).await;
        let loader = fixture.require();
        require(&loader, "gone.js").unwrap();
        fixture.remove("gone.js").await;
        assert!(matches!(require(&loader, "gone.js"), Err(ModuleError::ModuleNotFound(_))));
    }
}
