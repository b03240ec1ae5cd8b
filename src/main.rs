//! Relink CLI - demo front-end for the relation reconciliation engine
//!
//! Operates on a small users/groups schema: users join groups under a role,
//! and the membership join table is kept synchronized through the engine's
//! add / remove / set / save operations.

use anyhow::Context;
use clap::{Parser, Subcommand};
use relink::config::{self, RelinkConfig};
use relink::{
    EntityDef, PayloadDef, PayloadValue, RelationDef, SchemaRegistry, Session, SqliteStore, Value,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "relink")]
#[command(version = "0.1.0")]
#[command(about = "Many-to-many relation reconciliation over SQLite")]
#[command(long_about = r#"
Relink synchronizes in-memory relation collections with join tables,
computing the minimal insert/delete set on save.

Example usage:
  relink init
  relink add-user --name hans
  relink add-group --name admins
  relink link --user 1 --group 1 --role teamLeader
  relink show --user 1
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the database file (overrides relink.toml)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the config file and database tables
    Init {
        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Create and persist a user
    AddUser {
        #[arg(short, long)]
        name: String,
    },

    /// Create and persist a group
    AddGroup {
        #[arg(short, long)]
        name: String,
    },

    /// Add a user to a group under a role
    Link {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        group: i64,
        #[arg(short, long, default_value = "member")]
        role: String,
    },

    /// Remove a user from a group
    Unlink {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        group: i64,
        #[arg(short, long, default_value = "member")]
        role: String,
    },

    /// Replace a user's memberships wholesale
    SetGroups {
        #[arg(short, long)]
        user: i64,
        /// Group ids, comma separated
        #[arg(short, long, value_delimiter = ',')]
        groups: Vec<i64>,
        #[arg(short, long, default_value = "member")]
        role: String,
    },

    /// List a user's memberships
    Show {
        #[arg(short, long)]
        user: i64,
        /// Emit JSON instead of plain text
        #[arg(long)]
        json: bool,
    },

    /// Print row counts
    Stats,

    /// Print the active schema registry as JSON
    ExportSchema,
}

/// The demo schema: users and groups joined by role-carrying memberships
fn demo_registry() -> relink::Result<SchemaRegistry> {
    SchemaRegistry::builder()
        .entity(EntityDef::new("user", "users").with_field("name"))
        .entity(EntityDef::new("group", "groups").with_field("name"))
        .relation(
            RelationDef::new("groups", "user", "group", "memberships")
                .with_owner_columns(&["user_id"])
                .with_related_columns(&["group_id"])
                .with_payload(PayloadDef::scalar("role", "role"))
                .with_inverse("members"),
        )
        .relation(
            RelationDef::new("members", "group", "user", "memberships")
                .with_owner_columns(&["group_id"])
                .with_related_columns(&["user_id"])
                .with_payload(PayloadDef::scalar("role", "role"))
                .with_inverse("groups"),
        )
        .build()
}

fn resolve_database(cli_path: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(path) = cli_path {
        return Ok(path.to_path_buf());
    }
    if let Some(cfg) = config::load_config(None)? {
        if let Some(db) = cfg.database {
            return Ok(PathBuf::from(db));
        }
    }
    Ok(config::default_database_path_in(Path::new(".")))
}

fn load_registry() -> anyhow::Result<SchemaRegistry> {
    if let Some(cfg) = config::load_config(None)? {
        if let Some(schema_path) = cfg.schema {
            let json = std::fs::read_to_string(&schema_path)
                .with_context(|| format!("reading schema registry {}", schema_path))?;
            return Ok(SchemaRegistry::from_json(&json)?);
        }
    }
    Ok(demo_registry()?)
}

fn open_session(database: &Path) -> anyhow::Result<Session<SqliteStore>> {
    let registry = load_registry()?;
    config::ensure_db_dir(database)?;
    let store = SqliteStore::open(database)?;
    store.initialize_schema(&registry)?;
    Ok(Session::new(registry, store))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let database = resolve_database(cli.database.as_deref())?;

    match cli.command {
        Commands::Init { force } => {
            let cfg = RelinkConfig {
                database: Some(database.display().to_string()),
                schema: None,
            };
            let path = config::default_config_path();
            config::write_config(&path, &cfg, force)?;
            open_session(&database)?;
            println!("Initialized {} and {}", path.display(), database.display());
        }

        Commands::AddUser { name } => {
            let mut session = open_session(&database)?;
            let user = session.create("user")?;
            session.set_field(user, "name", name.as_str())?;
            session.save(user)?;
            let key = session.entity(user)?.key().map(|k| k[0].clone());
            println!("Created user {} (id {})", name, key.unwrap_or(Value::Null));
        }

        Commands::AddGroup { name } => {
            let mut session = open_session(&database)?;
            let group = session.create("group")?;
            session.set_field(group, "name", name.as_str())?;
            session.save(group)?;
            let key = session.entity(group)?.key().map(|k| k[0].clone());
            println!("Created group {} (id {})", name, key.unwrap_or(Value::Null));
        }

        Commands::Link { user, group, role } => {
            let mut session = open_session(&database)?;
            let user_id = session.attach_persisted("user", vec![Value::Integer(user)])?;
            let group_id = session.attach_persisted("group", vec![Value::Integer(group)])?;
            session.add(
                user_id,
                "groups",
                group_id,
                vec![PayloadValue::Scalar(Value::from(role.as_str()))],
            )?;
            session.save(user_id)?;
            println!("Linked user {} to group {} as {}", user, group, role);
        }

        Commands::Unlink { user, group, role } => {
            let mut session = open_session(&database)?;
            let user_id = session.attach_persisted("user", vec![Value::Integer(user)])?;
            let group_id = session.attach_persisted("group", vec![Value::Integer(group)])?;
            session.remove(
                user_id,
                "groups",
                group_id,
                vec![PayloadValue::Scalar(Value::from(role.as_str()))],
            )?;
            session.save(user_id)?;
            println!("Unlinked user {} from group {}", user, group);
        }

        Commands::SetGroups { user, groups, role } => {
            let mut session = open_session(&database)?;
            let user_id = session.attach_persisted("user", vec![Value::Integer(user)])?;
            let mut entries = Vec::with_capacity(groups.len());
            for group in &groups {
                let group_id = session.attach_persisted("group", vec![Value::Integer(*group)])?;
                entries.push((
                    group_id,
                    vec![PayloadValue::Scalar(Value::from(role.as_str()))],
                ));
            }
            session.set(user_id, "groups", entries)?;
            session.save(user_id)?;
            println!("User {} now has {} membership(s)", user, groups.len());
        }

        Commands::Show { user, json } => {
            let mut session = open_session(&database)?;
            let user_id = session.attach_persisted("user", vec![Value::Integer(user)])?;
            let memberships = session.get(user_id, "groups")?;
            let group_def = session.registry().entity("group")?.clone();

            let mut rows = Vec::with_capacity(memberships.len());
            for (group_id, payload) in memberships {
                let key = session.entity(group_id)?.key().map(|k| k[0].clone());
                let name = match &key {
                    Some(k) => session
                        .store()
                        .load_entity_fields(&group_def, std::slice::from_ref(k))?
                        .and_then(|fields| fields.get("name").cloned()),
                    None => None,
                };
                let role = payload.first().and_then(|p| match p {
                    PayloadValue::Scalar(v) => Some(v.clone()),
                    PayloadValue::Entity(_) => None,
                });
                rows.push((key, name, role));
            }

            if json {
                let items: Vec<serde_json::Value> = rows
                    .iter()
                    .map(|(key, name, role)| {
                        serde_json::json!({
                            "group": key.as_ref().map(ToString::to_string),
                            "name": name.as_ref().map(ToString::to_string),
                            "role": role.as_ref().map(ToString::to_string),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                println!("User {} memberships:", user);
                for (key, name, role) in rows {
                    println!(
                        "  group {} ({}) as {}",
                        key.unwrap_or(Value::Null),
                        name.unwrap_or(Value::Null),
                        role.unwrap_or(Value::Null)
                    );
                }
            }
        }

        Commands::Stats => {
            let registry = load_registry()?;
            let store = SqliteStore::open(&database)?;
            store.initialize_schema(&registry)?;
            println!("Database statistics:");
            for entity in registry.entities() {
                println!("  {}: {}", entity.table, store.count_rows(&entity.table)?);
            }
            let mut seen: Vec<&str> = Vec::new();
            for relation in registry.relations() {
                if seen.contains(&relation.join_table.as_str()) {
                    continue;
                }
                seen.push(&relation.join_table);
                println!(
                    "  {}: {}",
                    relation.join_table,
                    store.count_rows(&relation.join_table)?
                );
            }
        }

        Commands::ExportSchema => {
            let registry = load_registry()?;
            println!("{}", registry.to_json()?);
        }
    }

    Ok(())
}
