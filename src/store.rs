use crate::models::{AppMode, LocalSettings, ModeMap, PostSwitchStrategy, SwitchHistory};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use uuid::Uuid;

const SETTINGS_SINGLETON_ID: i64 = 1;

#[derive(Debug, Clone)]
pub struct AppStore {
    pub base_dir: PathBuf,
    pub db_path: PathBuf,
}

impl AppStore {
    pub fn new(base_dir: PathBuf) -> Self {
        let db_path = base_dir.join("codex-switch-runtime.db");
        Self { base_dir, db_path }
    }

    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)
            .with_context(|| format!("创建数据目录失败: {}", self.base_dir.display()))?;
        let conn = self.open_conn()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS app_settings (
              id INTEGER PRIMARY KEY CHECK (id = 1),
              app_mode TEXT NOT NULL DEFAULT 'gpt',
              auto_switch_enabled INTEGER NOT NULL DEFAULT 1,
              auto_refresh_on_startup INTEGER NOT NULL DEFAULT 0,
              keepalive_enabled INTEGER NOT NULL DEFAULT 1,
              post_switch_strategy TEXT NOT NULL DEFAULT 'restart_extension_host',
              hook_version_snapshot TEXT,
              active_profile_gpt TEXT,
              active_profile_opencode TEXT,
              updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS switch_history (
              id TEXT PRIMARY KEY,
              mode TEXT NOT NULL,
              from_profile TEXT,
              to_profile TEXT NOT NULL,
              result TEXT NOT NULL,
              message TEXT,
              created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_switch_history_created_at
              ON switch_history(created_at DESC);
        "#,
        )
        .context("初始化数据库失败")?;
        conn.execute(
            r#"
            INSERT INTO app_settings(id, updated_at)
            VALUES (?1, ?2)
            ON CONFLICT(id) DO NOTHING
        "#,
            params![SETTINGS_SINGLETON_ID, now()],
        )
        .context("初始化设置失败")?;
        Ok(())
    }

    pub fn open_conn(&self) -> Result<Connection> {
        Connection::open(&self.db_path)
            .with_context(|| format!("打开数据库失败: {}", self.db_path.display()))
    }

    pub fn load_settings(&self) -> Result<LocalSettings> {
        let conn = self.open_conn()?;
        conn.query_row(
            r#"
            SELECT app_mode, auto_switch_enabled, auto_refresh_on_startup, keepalive_enabled,
                   post_switch_strategy, hook_version_snapshot, active_profile_gpt, active_profile_opencode
            FROM app_settings WHERE id = ?1
            "#,
            params![SETTINGS_SINGLETON_ID],
            |row| {
                let defaults = LocalSettings::default();
                Ok(LocalSettings {
                    app_mode: AppMode::parse(&row.get::<_, String>(0)?).unwrap_or(defaults.app_mode),
                    auto_switch_enabled: row.get::<_, i64>(1)? != 0,
                    auto_refresh_on_startup: row.get::<_, i64>(2)? != 0,
                    keepalive_enabled: row.get::<_, i64>(3)? != 0,
                    post_switch_strategy: PostSwitchStrategy::parse(&row.get::<_, String>(4)?)
                        .unwrap_or(defaults.post_switch_strategy),
                    hook_version_snapshot: clean_text(row.get(5)?),
                    active_profile_by_mode: ModeMap {
                        gpt: clean_text(row.get(6)?),
                        opencode: clean_text(row.get(7)?),
                    },
                })
            },
        )
        .optional()
        .context("读取本地设置失败")
        .map(Option::unwrap_or_default)
    }

    pub fn save_settings(&self, settings: &LocalSettings) -> Result<()> {
        let conn = self.open_conn()?;
        conn.execute(
            r#"
            UPDATE app_settings
            SET app_mode = ?1, auto_switch_enabled = ?2, auto_refresh_on_startup = ?3,
                keepalive_enabled = ?4, post_switch_strategy = ?5, hook_version_snapshot = ?6,
                active_profile_gpt = ?7, active_profile_opencode = ?8, updated_at = ?9
            WHERE id = ?10
            "#,
            params![
                settings.app_mode.as_str(),
                settings.auto_switch_enabled as i64,
                settings.auto_refresh_on_startup as i64,
                settings.keepalive_enabled as i64,
                settings.post_switch_strategy.as_str(),
                settings.hook_version_snapshot,
                settings.active_profile_by_mode.gpt,
                settings.active_profile_by_mode.opencode,
                now(),
                SETTINGS_SINGLETON_ID
            ],
        )
        .context("写入本地设置失败")?;
        Ok(())
    }

    pub fn create_switch_history(
        &self,
        mode: AppMode,
        from_profile: Option<&str>,
        to_profile: &str,
        result: &str,
        message: Option<&str>,
    ) -> Result<String> {
        let conn = self.open_conn()?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            r#"
            INSERT INTO switch_history(
              id, mode, from_profile, to_profile, result, message, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                id,
                mode.as_str(),
                from_profile,
                to_profile,
                result,
                message,
                now()
            ],
        )
        .context("写入切换历史失败")?;
        Ok(id)
    }

    pub fn list_switch_history(&self, limit: usize) -> Result<Vec<SwitchHistory>> {
        let conn = self.open_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, mode, from_profile, to_profile, result, message, created_at
            FROM switch_history
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(SwitchHistory {
                id: row.get(0)?,
                mode: AppMode::parse(&row.get::<_, String>(1)?).unwrap_or_default(),
                from_profile: row.get(2)?,
                to_profile: row.get(3)?,
                result: row.get(4)?,
                message: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;
        Ok(rows.filter_map(Result::ok).collect())
    }
}

fn clean_text(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

pub fn now() -> String {
    Utc::now().to_rfc3339()
}
