// src/commands/collect.rs

//! The collect command: sorted listings across the application

use anyhow::{bail, Result};

use gorpa::{Component, Settings};

use super::{
    get_application, write_formatted, ComponentDescription, GlobalArgs, OutputFormat,
    PackageDescription, ScriptDescription,
};

/// What to collect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CollectKind {
    #[default]
    Packages,
    Components,
    Scripts,
}

pub async fn cmd_collect(
    global: &GlobalArgs,
    kind: CollectKind,
    select: Option<&str>,
    format: Option<OutputFormat>,
    settings: &Settings,
) -> Result<()> {
    let app = get_application(global, settings).await?;

    // filter by component constants: `-l foo` selects components having a
    // foo constant, `-l foo=bar` additionally requires the value to match
    let selector: Box<dyn Fn(&Component) -> bool> = match select {
        None | Some("") => Box::new(|_| true),
        Some(sel) => match sel.split_once('=') {
            Some((key, value)) => {
                let (key, value) = (key.to_string(), value.to_string());
                Box::new(move |c: &Component| c.constants.get(&key) == Some(&value))
            }
            None => {
                let key = sel.to_string();
                Box::new(move |c: &Component| c.constants.contains_key(&key))
            }
        },
    };
    if let Some(sel) = select {
        if sel.split('=').count() > 2 {
            bail!("selector must either be a constant name or const=value");
        }
    }

    match kind {
        CollectKind::Packages => {
            let mut descs = Vec::new();
            for pkg in app.packages.values() {
                if !selector(&pkg.component) {
                    continue;
                }
                descs.push(PackageDescription::new(&app, pkg)?);
            }
            descs.sort_by(|a, b| a.metadata.full_name.cmp(&b.metadata.full_name));
            match format {
                Some(format) => write_formatted(format, &descs)?,
                None => {
                    for desc in &descs {
                        println!("{}\t{}", desc.metadata.full_name, desc.metadata.version);
                    }
                }
            }
        }
        CollectKind::Components => {
            let mut descs: Vec<_> = app
                .components
                .values()
                .filter(|c| selector(c))
                .map(|c| ComponentDescription::new(c))
                .collect();
            descs.sort_by(|a, b| a.name.cmp(&b.name));
            match format {
                Some(format) => write_formatted(format, &descs)?,
                None => {
                    for desc in &descs {
                        println!("{}", desc.name);
                    }
                }
            }
        }
        CollectKind::Scripts => {
            let mut descs: Vec<_> = app
                .scripts
                .values()
                .filter(|s| selector(&s.component))
                .map(|s| ScriptDescription::new(s))
                .collect();
            descs.sort_by(|a, b| a.full_name.cmp(&b.full_name));
            match format {
                Some(format) => write_formatted(format, &descs)?,
                None => {
                    for desc in &descs {
                        match &desc.description {
                            Some(text) => println!("{}\t{}", desc.full_name, text),
                            None => println!("{}", desc.full_name),
                        }
                    }
                }
            }
        }
    }
    Ok(())
}
