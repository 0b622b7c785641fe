//! Tree command: display the dependency tree from the lockfile.

use std::borrow::Cow;
use std::collections::BTreeSet;

use anyhow::Result;
use clap::Args;
use ptree::{print_tree, TreeItem};

use botpack::lockfile::{package_key, split_key, Lockfile};
use botpack::manifest::Manifest;

use crate::commands::Ctx;

/// Arguments for the tree command
#[derive(Args, Debug)]
pub struct TreeArgs {
    /// Maximum depth to display
    #[arg(long, value_name = "NUM")]
    pub depth: Option<usize>,
}

pub fn execute(args: TreeArgs, ctx: &Ctx) -> Result<()> {
    let ws = ctx.workspace()?;
    let manifest = Manifest::load(&ws.manifest_path())?;
    let lock = Lockfile::load(&ws.lockfile_path())?;
    let max_depth = args.depth.unwrap_or(usize::MAX);

    let mut roots = Vec::new();
    for name in manifest.dependencies.keys() {
        // Find the pinned version(s) for this direct dependency.
        let mut found = false;
        for key in lock.packages.keys() {
            if split_key(key).map(|(n, _)| n) == Some(name.as_str()) {
                let mut seen = BTreeSet::new();
                roots.push(build_node(key, &lock, max_depth, 0, &mut seen));
                found = true;
            }
        }
        if !found {
            roots.push(TreeNode {
                label: format!("{name} (not installed)"),
                children: vec![],
            });
        }
    }

    let root = TreeNode {
        label: ws.root().display().to_string(),
        children: roots,
    };
    if !ctx.output.json {
        print_tree(&root)?;
    }
    botpack::output::report_json_ok(
        &ctx.output,
        serde_json::json!({"packages": lock.packages.keys().collect::<Vec<_>>()}),
    );
    Ok(())
}

fn build_node(
    key: &str,
    lock: &Lockfile,
    max_depth: usize,
    depth: usize,
    seen: &mut BTreeSet<String>,
) -> TreeNode {
    let mut children = Vec::new();
    if depth < max_depth && seen.insert(key.to_string()) {
        if let Some(pkg) = lock.packages.get(key) {
            for (dep_name, dep_version) in &pkg.dependencies {
                let child_key = package_key(dep_name, dep_version);
                children.push(build_node(&child_key, lock, max_depth, depth + 1, seen));
            }
        }
    }
    TreeNode {
        label: key.to_string(),
        children,
    }
}

/// Tree node structure for ptree visualization
#[derive(Clone)]
struct TreeNode {
    label: String,
    children: Vec<TreeNode>,
}

impl TreeItem for TreeNode {
    type Child = TreeNode;

    fn write_self<W: std::io::Write>(
        &self,
        f: &mut W,
        _style: &ptree::Style,
    ) -> std::io::Result<()> {
        write!(f, "{}", self.label)
    }

    fn children(&self) -> Cow<'_, [Self::Child]> {
        Cow::Borrowed(&self.children)
    }
}
