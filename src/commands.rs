//! Subcommand handlers.

use crate::cli::{parse_arg, Cli, Command};
use crate::output;
use crate::prompt::{confirm, TerminalPrompt};

use anyhow::{anyhow, bail, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};
use xenctl_ssh::{run_script, ScriptRequest};
use xenctl_xapi::credentials::CredentialCache;
use xenctl_xapi::host::HostManager;
use xenctl_xapi::session::normalize_endpoint;
use xenctl_xapi::storage::StorageManager;
use xenctl_xapi::units::{format_bytes, parse_bytes};
use xenctl_xapi::vm::{VmCreateSpec, VmManager};
use xenctl_xapi::{Session, XenConfig};

/// Credentials and output mode shared by every subcommand of one run.
struct Runner {
    json: bool,
    insecure: bool,
    cache: CredentialCache,
    prompt: TerminalPrompt,
}

impl Runner {
    /// Log in, taking the password from the flag or the cache/prompt.
    async fn open(&mut self, server: &str, user: &str, password: Option<String>) -> Result<Session> {
        let mut config = XenConfig::new(server, user);
        config.insecure = self.insecure;
        let host = normalize_endpoint(server)?
            .host_str()
            .unwrap_or_default()
            .to_string();
        debug!("connecting to {} as {}", host, user);

        let secret = match password {
            Some(p) => {
                let secret = SecretString::new(p);
                self.cache.insert(user, &host, SecretString::new(secret.expose_secret().clone()));
                secret
            }
            None => SecretString::new(
                self.cache
                    .get_or_prompt(user, &host, &self.prompt)?
                    .expose_secret()
                    .clone(),
            ),
        };
        let session = Session::open(&config, Some(secret), &self.prompt)
            .await
            .with_context(|| format!("login to {host} as {user} failed"))?;
        Ok(session)
    }

    fn print<T: serde::Serialize + ?Sized>(&self, value: &T, table: impl FnOnce() -> String) -> Result<()> {
        if self.json {
            println!("{}", output::json(value)?);
        } else {
            println!("{}", table());
        }
        Ok(())
    }
}

async fn remote_script(ctx: &mut Runner, request: ScriptRequest) -> Result<()> {
    debug!("running script on {}@{}:{}", request.username, request.host, request.port);
    let out = run_script(request, &mut ctx.cache, &ctx.prompt).await?;
    if ctx.json {
        println!("{}", output::json(&out)?);
    } else {
        print!("{}", out.stdout);
        eprint!("{}", out.stderr);
    }
    if !out.success() {
        bail!("script exited with status {}", out.exit_status);
    }
    Ok(())
}

pub async fn run(cli: Cli) -> Result<()> {
    let Cli {
        server,
        user,
        password,
        insecure,
        json,
        command,
        ..
    } = cli;
    let mut ctx = Runner {
        json,
        insecure,
        cache: CredentialCache::new(),
        prompt: TerminalPrompt,
    };

    // The only subcommand that does not talk to XenAPI.
    let command = match command {
        Command::RunScript {
            host,
            script,
            ssh_user,
            port,
            ssh_password,
            sudo,
        } => {
            let body = std::fs::read_to_string(&script)
                .with_context(|| format!("cannot read {}", script.display()))?;
            let mut request = ScriptRequest::new(host, ssh_user, body);
            request.port = port;
            request.sudo = sudo;
            request.password = ssh_password.map(SecretString::new);
            return remote_script(&mut ctx, request).await;
        }
        other => other,
    };

    let server = server.ok_or_else(|| anyhow!("no server given (use --server or XENCTL_SERVER)"))?;
    let session = ctx.open(&server, &user, password).await?;
    let vms = VmManager::new(&session);

    match command {
        Command::Vms => {
            let list = vms.list_vms().await?;
            ctx.print(&list, || output::vm_table(&list))?;
        }
        Command::Templates => {
            let list = vms.list_templates().await?;
            ctx.print(&list, || output::template_table(&list))?;
        }
        Command::Srs => {
            let list = StorageManager::new(&session).list_srs().await?;
            ctx.print(&list, || output::sr_table(&list))?;
        }
        Command::Hosts => {
            let list = HostManager::new(&session).host_metrics().await?;
            ctx.print(&list, || output::host_table(&list))?;
        }
        Command::Methods { namespace } => {
            let catalog = session.catalog();
            if let Some(ns) = namespace.as_deref() {
                if !catalog.has_namespace(ns) {
                    bail!("the server advertises no namespace '{ns}'");
                }
            }
            if ctx.json {
                let names: Vec<String> = match namespace.as_deref() {
                    Some(ns) => catalog.methods(ns).map(|m| format!("{ns}.{m}")).collect(),
                    None => catalog.namespaces().map(str::to_string).collect(),
                };
                println!("{}", output::json(&names)?);
            } else {
                println!("{}", output::catalog_listing(catalog, namespace.as_deref()));
            }
        }
        Command::Call { method, args } => {
            let (ns, name) = method
                .rsplit_once('.')
                .ok_or_else(|| anyhow!("method must be Namespace.method, got '{method}'"))?;
            let args = args.iter().map(|a| parse_arg(a)).collect::<Result<Vec<_>>>()?;
            let namespace = session.ns(ns);
            if !namespace.advertises(name) {
                warn!("{} is not in the server's method catalog; sending anyway", method);
            }
            let result = namespace.call(name, args).await?;
            if ctx.json {
                println!("{}", output::json(&serde_json::Value::from(result))?);
            } else {
                println!("{}", output::value(&result)?);
            }
        }
        Command::CreateVm {
            name,
            template,
            memory,
            description,
            start,
        } => {
            let spec = VmCreateSpec {
                template,
                name,
                description,
                memory: memory.as_deref().map(parse_bytes).transpose()?,
                start,
            };
            let vm = vms.create_vm(&spec).await?;
            ctx.print(&vm, || format!("created {} ({})", spec.name, vm))?;
        }
        Command::DestroyVm { vm, yes } => {
            let target = vms.find_vm(&vm).await?;
            if !yes
                && !confirm(&format!(
                    "Destroy VM '{}' ({}) and its disks?",
                    target.record.name_label, target.record.uuid
                ))?
            {
                bail!("aborted");
            }
            let report = vms.destroy_vm(target.reference.as_str()).await?;
            ctx.print(&report, || {
                format!(
                    "destroyed {} and {} disk(s)",
                    report.name_label,
                    report.destroyed_vdis.len()
                )
            })?;
        }
        Command::Start { vm } => {
            let r = vms.start_vm(&vm).await?;
            ctx.print(&r, || format!("started {vm}"))?;
        }
        Command::Shutdown { vm, force } => {
            let r = vms.shutdown_vm(&vm, force).await?;
            ctx.print(&r, || format!("shut down {vm}"))?;
        }
        Command::Import { file, sr } => {
            let report = vms.import_vm(&file, sr.as_deref()).await?;
            ctx.print(&report, || {
                let refs: Vec<&str> = report.vms.iter().map(|r| r.as_str()).collect();
                format!("imported {} as {}", format_bytes(report.bytes), refs.join(", "))
            })?;
        }
        Command::Export { vm, file } => {
            let bytes = vms.export_vm(&vm, &file).await?;
            ctx.print(&bytes, || {
                format!("exported {} to {}", format_bytes(bytes), file.display())
            })?;
        }
        Command::Transfer {
            vm,
            to,
            to_user,
            to_password,
            sr,
        } => {
            let to_user = to_user.unwrap_or_else(|| user.clone());
            let destination = ctx.open(&to, &to_user, to_password).await?;
            let report = vms.transfer_to(&destination, &vm, sr.as_deref()).await?;
            ctx.print(&report, || {
                format!(
                    "transferred {} to {} ({} VM(s) created)",
                    format_bytes(report.bytes),
                    destination.host(),
                    report.vms.len()
                )
            })?;
        }
        Command::RunScript { .. } => bail!("run-script does not use a XenAPI session"),
    }
    Ok(())
}
