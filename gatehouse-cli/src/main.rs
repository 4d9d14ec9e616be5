//! Gatehouse CLI - inspect manifests and evaluate authorization rules

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use gatehouse_core::manifest::{load_manifest, scan_directory};
use gatehouse_core::{
    Actor, AuthorizationRequest, DescriptorCache, Gatekeeper, GatehouseConfig, MetadataRegistry,
    RequestInfo, TargetRef,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

#[derive(Parser)]
#[command(name = "gatehouse")]
#[command(about = "Gatehouse - declarative authorization and dynamic user fields")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (falls back to GATEHOUSE_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a manifest directory and list declared metadata
    Scan {
        /// Only show this type
        #[arg(short, long)]
        model: Option<String>,

        /// Manifest directory
        #[arg(short, long, default_value = "manifests")]
        path: PathBuf,

        /// Output format (json, text)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Validate a manifest file
    Validate {
        /// Manifest file path
        file: PathBuf,
    },

    /// Evaluate the rules on a target for an actor
    Eval {
        /// Manifest file or directory
        #[arg(short, long)]
        manifest: PathBuf,

        /// Target, `Type` or `Type::member`
        #[arg(short, long)]
        target: String,

        /// Actor id
        #[arg(long, default_value = "1")]
        actor: u64,

        /// Actor user type
        #[arg(long)]
        user_type: Option<String>,

        /// Roles held by the actor
        #[arg(long, value_delimiter = ',')]
        roles: Vec<String>,

        /// Permissions held by the actor
        #[arg(long, value_delimiter = ',')]
        permissions: Vec<String>,

        /// Request path
        #[arg(long, default_value = "/")]
        path: String,

        /// Accept header
        #[arg(long)]
        accept: Option<String>,

        /// Treat the request as XMLHttpRequest
        #[arg(long)]
        ajax: bool,

        /// Output format (json, text)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the SQL schema for the configured tables
    Schema,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("gatehouse=debug")
            .with_writer(std::io::stderr)
            .init();
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Scan {
            model,
            path,
            format,
        } => scan_command(&config, model, &path, &format),
        Commands::Validate { file } => validate_command(&file),
        Commands::Eval {
            manifest,
            target,
            actor,
            user_type,
            roles,
            permissions,
            path,
            accept,
            ajax,
            format,
        } => {
            let mut request = RequestInfo::new(path).with_ajax(ajax);
            if let Some(accept) = accept {
                request = request.with_accept(accept);
            }
            let mut principal = Actor::new(actor);
            if let Some(user_type) = user_type {
                principal = principal.with_user_type(user_type);
            }

            eval_command(
                config,
                &manifest,
                &target,
                principal,
                Grants { roles, permissions },
                request,
                &format,
            )
        }
        Commands::Schema => {
            print!(
                "{}",
                gatehouse_core::schema::render_ddl(&config.tables, config.dynamic_fields_column)
            );
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<GatehouseConfig> {
    let path = match path {
        Some(path) => Some(path.to_path_buf()),
        None => std::env::var_os("GATEHOUSE_CONFIG").map(PathBuf::from),
    };

    match path {
        Some(path) => {
            debug!("Loading configuration from {}", path.display());
            GatehouseConfig::from_file(&path)
                .with_context(|| format!("Failed to load configuration: {}", path.display()))
        }
        None => Ok(GatehouseConfig::default()),
    }
}

#[derive(Serialize)]
struct TypeSummary<'a> {
    name: &'a str,
    rules: Vec<String>,
    members: Vec<MemberSummary<'a>>,
    fields: Vec<&'a gatehouse_core::FieldDescriptor>,
    roles: &'a [gatehouse_core::RoleDeclaration],
}

#[derive(Serialize)]
struct MemberSummary<'a> {
    name: &'a str,
    rules: Vec<String>,
}

fn summarize<'a>(registry: &'a MetadataRegistry, name: &'a str) -> Result<TypeSummary<'a>> {
    let class_rules = registry.rules_for(&TargetRef::class(name))?;
    let class_len = class_rules.len();

    let members = registry
        .members_of(name)?
        .into_iter()
        .map(|member| {
            let rules = registry.rules_for(&TargetRef::member(name, member))?;
            Ok(MemberSummary {
                name: member,
                rules: rules.iter().skip(class_len).map(ToString::to_string).collect(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(TypeSummary {
        name,
        rules: class_rules.iter().map(ToString::to_string).collect(),
        members,
        fields: registry.fields_for(name)?.iter().collect(),
        roles: registry.roles_for(name)?,
    })
}

fn scan_command(config: &GatehouseConfig, model: Option<String>, path: &Path, format: &str) -> Result<()> {
    let start = Instant::now();
    let report = scan_directory(path, config.authorization.duplicate_fields)
        .with_context(|| format!("Failed to scan {}", path.display()))?;

    for skipped in &report.skipped {
        eprintln!(
            "{} Skipped {}: {}",
            "!".yellow(),
            skipped.path.display(),
            skipped.reason
        );
    }

    let registry = &report.registry;
    let names: Vec<&str> = match &model {
        Some(model) if registry.contains_type(model) => vec![model.as_str()],
        Some(model) => bail!("Type '{}' was not found in {}", model, path.display()),
        None => registry.type_names(),
    };

    let summaries = names
        .into_iter()
        .map(|name| summarize(registry, name))
        .collect::<Result<Vec<_>>>()?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    println!(
        "{} Scanned {} manifest(s) in {}",
        "→".blue(),
        report.scanned.len(),
        path.display()
    );

    for summary in &summaries {
        println!("\n{} {}", "═".blue().bold(), summary.name.bold());
        for rule in &summary.rules {
            println!("{} {}", "▸".blue(), rule);
        }
        for member in &summary.members {
            println!("{} {}", "▸".blue(), member.name);
            for rule in &member.rules {
                println!("    {}", rule);
            }
        }
        for field in &summary.fields {
            let mut flags = Vec::new();
            if field.required {
                flags.push("required");
            }
            if field.unique {
                flags.push("unique");
            }
            println!(
                "{} field {}: {} {}",
                "▸".blue(),
                field.name,
                field.field_type.as_str(),
                flags.join(" ")
            );
        }
        for role in summary.roles {
            println!(
                "{} role {}: {}",
                "▸".blue(),
                role.name,
                role.permissions.join(", ")
            );
        }
    }

    println!(
        "\n{} {} type(s) in {:.3}ms",
        "✓".green(),
        summaries.len(),
        start.elapsed().as_secs_f64() * 1000.0
    );

    Ok(())
}

fn validate_command(file: &Path) -> Result<()> {
    println!("{} Validating {}...", "→".blue(), file.display());

    let result = load_manifest(file).and_then(|manifest| {
        let mut builder = MetadataRegistry::builder();
        manifest.register(&mut builder)?;
        Ok(manifest)
    });

    match result {
        Ok(manifest) => {
            println!("{} Manifest is valid!", "✓".green());
            println!("  Types: {}", manifest.types.len());
            println!("  Rules: {}", manifest.rule_count());
            println!(
                "  Fields: {}",
                manifest.types.iter().map(|t| t.fields.len()).sum::<usize>()
            );
            Ok(())
        }
        Err(e) => {
            println!("{} Manifest is invalid:", "✗".red());
            println!("  {}", e);
            std::process::exit(1);
        }
    }
}

struct Grants {
    roles: Vec<String>,
    permissions: Vec<String>,
}

fn load_registry(manifest: &Path, config: &GatehouseConfig) -> Result<MetadataRegistry> {
    if manifest.is_dir() {
        let report = scan_directory(manifest, config.authorization.duplicate_fields)?;
        for skipped in &report.skipped {
            eprintln!(
                "{} Skipped {}: {}",
                "!".yellow(),
                skipped.path.display(),
                skipped.reason
            );
        }
        Ok(report.registry)
    } else {
        Ok(gatehouse_core::manifest::load_registry(
            manifest,
            config.authorization.duplicate_fields,
        )?)
    }
}

fn eval_command(
    config: GatehouseConfig,
    manifest: &Path,
    target: &str,
    actor: Actor,
    grants: Grants,
    request: RequestInfo,
    format: &str,
) -> Result<()> {
    let start = Instant::now();
    let target: TargetRef = target.parse()?;

    let registry = load_registry(manifest, &config)
        .with_context(|| format!("Failed to load {}", manifest.display()))?;
    let gatekeeper = Gatekeeper::from_config(config, Arc::new(DescriptorCache::fixed(registry)))?;

    let rbac = gatekeeper.rbac();
    for role in &grants.roles {
        rbac.create_role(role)?;
        rbac.assign_role(actor.id, role)?;
    }
    for permission in &grants.permissions {
        rbac.create_permission(permission)?;
        if rbac.supports_direct_grants() {
            rbac.give_permission_to(actor.id, permission)?;
        } else if grants.roles.is_empty() {
            bail!(
                "The {} backend needs --roles to carry --permissions",
                rbac.backend_name()
            );
        } else {
            for role in &grants.roles {
                rbac.grant_permission(role, permission)?;
            }
        }
    }

    let kind = gatekeeper.classifier().classify(&request);
    let result = gatekeeper.authorize(&AuthorizationRequest::new(target.clone(), actor, request))?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("{} Evaluating {} as {} request...", "→".blue(), target, kind);

    let status = if result.decision.is_allowed() {
        "ALLOWED".green()
    } else {
        "DENIED".red()
    };

    println!("\n{} Authorization Result", "═".blue().bold());
    println!("{} Status: {}", "▸".blue(), status);
    if let Some(denial) = result.decision.denial() {
        println!("{} Reason: {}", "▸".blue(), denial.reason);
        println!("{} Message: {}", "▸".blue(), denial.message);
        println!("{} Status hint: {}", "▸".blue(), denial.status_hint);
    }
    println!(
        "{} Evaluation time: {:.3}ms",
        "▸".blue(),
        result.evaluation_time_ns as f64 / 1_000_000.0
    );

    if !result.outcomes.is_empty() {
        println!("{} Evaluated rules:", "▸".blue());
        for outcome in &result.outcomes {
            let mark = if outcome.passed() { "✓".green() } else { "✗".red() };
            println!("  {} {}", mark, outcome.rule);
        }
    }

    println!(
        "\n{} Total time: {:.3}ms",
        "✓".green(),
        start.elapsed().as_secs_f64() * 1000.0
    );

    Ok(())
}
