//! Query git repositories for changed files and the contents of HEAD.
use std::{
    collections::{HashMap, HashSet},
    path::{Component, Path},
    sync::Mutex,
};

use anyhow::{anyhow, bail, Result};
use git2::{Delta, Diff, DiffOptions, ObjectType, Repository, Tree};
use tracing::{event, Level};

/// A service for querying git repositories.
pub trait GitService: Sync + Send {
    /// Find files changed in the working tree and index compared to HEAD.
    ///
    /// Untracked files are included and deleted files are not.
    ///
    /// # Returns
    ///
    /// Set of changed files relative to the root of the main repository.
    fn find_changed_files(&self) -> Result<HashSet<String>>;

    /// Find files changed by the given commit compared to its first parent.
    ///
    /// Module repositories are diffed the same way at their own revision. Modules without a
    /// revision are skipped.
    ///
    /// # Arguments
    ///
    /// * `revision` - Revision of commit to query in the main repository.
    /// * `module_revisions` - Revision of commit to query in each module, keyed by module name.
    ///
    /// # Returns
    ///
    /// Set of changed files relative to the root of the main repository.
    fn find_changed_files_in_commit(
        &self,
        revision: &str,
        module_revisions: &HashMap<String, String>,
    ) -> Result<HashSet<String>>;

    /// Determine whether the given file exists in the HEAD commit of the repository that owns it.
    ///
    /// # Arguments
    ///
    /// * `file_path` - Path to file relative to the root of the main repository.
    ///
    /// # Returns
    ///
    /// true if the file exists at HEAD.
    fn file_exists_at_head(&self, file_path: &str) -> Result<bool>;
}

/// A git repository and the directory it lives in relative to the main repository.
struct ModuleRepo {
    repo: Mutex<Repository>,
    /// Name of the module, None for the main repository.
    name: Option<String>,
    prefix: Option<String>,
}

impl ModuleRepo {
    /// Prefix the given repository relative path with the module directory.
    fn prefixed(&self, path: &Path) -> String {
        let path = path.to_string_lossy().replace('\\', "/");
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix, path),
            None => path,
        }
    }

    /// Strip the module directory from the given path if it belongs to this module.
    fn strip_prefix<'a>(&self, path: &'a str) -> Option<&'a str> {
        match &self.prefix {
            Some(prefix) => path
                .strip_prefix(prefix.as_str())
                .and_then(|p| p.strip_prefix('/')),
            None => Some(path),
        }
    }
}

/// Implementation of GitService backed by libgit2.
pub struct GitServiceImpl {
    /// Main repository followed by any module repositories.
    repos: Vec<ModuleRepo>,
}

impl GitServiceImpl {
    /// Open the repository at the given location along with any module repositories.
    ///
    /// # Arguments
    ///
    /// * `repo_root` - Root of the main repository.
    /// * `module_dirs` - Directories of module repositories relative to `repo_root`. Modules that
    ///   are not checked out are skipped.
    pub fn new(repo_root: &Path, module_dirs: &[String]) -> Result<Self> {
        let mut repos = vec![ModuleRepo {
            repo: Mutex::new(Repository::open(repo_root)?),
            name: None,
            prefix: None,
        }];

        for module_dir in module_dirs {
            let module_path = repo_root.join(module_dir);
            let prefix = module_dir.trim_end_matches('/');
            match Repository::open(&module_path) {
                Ok(repo) => repos.push(ModuleRepo {
                    repo: Mutex::new(repo),
                    name: prefix.rsplit('/').next().map(|name| name.to_string()),
                    prefix: Some(prefix.to_string()),
                }),
                Err(err) => {
                    event!(
                        Level::DEBUG,
                        module_dir = module_dir.as_str(),
                        error = err.message(),
                        "Skipping module that is not a git repository"
                    );
                }
            }
        }

        Ok(Self { repos })
    }
}

impl GitService for GitServiceImpl {
    fn find_changed_files(&self) -> Result<HashSet<String>> {
        let mut changed_files = HashSet::new();
        for module in &self.repos {
            let repo = lock_repo(module)?;
            let head_tree = repo.head()?.peel_to_tree()?;
            let mut opts = DiffOptions::new();
            opts.include_untracked(true).recurse_untracked_dirs(true);
            let diff = repo.diff_tree_to_workdir_with_index(Some(&head_tree), Some(&mut opts))?;
            changed_files.extend(modified_files_for_diff(&diff, module));
        }
        Ok(changed_files)
    }

    fn find_changed_files_in_commit(
        &self,
        revision: &str,
        module_revisions: &HashMap<String, String>,
    ) -> Result<HashSet<String>> {
        let mut changed_files = HashSet::new();
        for module in &self.repos {
            let module_revision = match &module.name {
                None => revision,
                Some(name) => match module_revisions.get(name) {
                    Some(module_revision) => module_revision.as_str(),
                    None => {
                        event!(
                            Level::DEBUG,
                            module = name.as_str(),
                            "Skipping module without a revision"
                        );
                        continue;
                    }
                },
            };

            let repo = lock_repo(module)?;
            let commit = repo.revparse_single(module_revision)?.peel_to_commit()?;
            let parent = commit.parent(0)?;
            let diff =
                repo.diff_tree_to_tree(Some(&parent.tree()?), Some(&commit.tree()?), None)?;
            changed_files.extend(modified_files_for_diff(&diff, module));
        }
        Ok(changed_files)
    }

    fn file_exists_at_head(&self, file_path: &str) -> Result<bool> {
        // Module repos are checked first since their directories live inside the main repo.
        for module in self.repos.iter().rev() {
            if let Some(relative_path) = module.strip_prefix(file_path) {
                let repo = lock_repo(module)?;
                let head_tree = repo.head()?.peel_to_tree()?;
                return tree_contains_path(&repo, &head_tree, relative_path);
            }
        }
        Ok(false)
    }
}

/// Acquire exclusive access to the repository of a module.
fn lock_repo(module: &ModuleRepo) -> Result<std::sync::MutexGuard<'_, Repository>> {
    module
        .repo
        .lock()
        .map_err(|_| anyhow!("Git repository lock was poisoned"))
}

/// Collect the files in the given diff that were not deleted.
///
/// # Arguments
///
/// * `diff` - Diff to query.
/// * `module` - Repository the diff belongs to.
///
/// # Returns
///
/// Set of changed files, prefixed with the module directory.
fn modified_files_for_diff(diff: &Diff, module: &ModuleRepo) -> HashSet<String> {
    diff.deltas()
        .filter(|delta| delta.status() != Delta::Deleted)
        .filter_map(|delta| delta.new_file().path().map(|p| module.prefixed(p)))
        .collect()
}

/// Determine whether the given tree contains the given path.
///
/// The directory portion of the path is resolved one segment at a time, any missing segment
/// means the file does not exist.
///
/// # Arguments
///
/// * `repo` - Repository the tree belongs to.
/// * `tree` - Root tree to search.
/// * `file_path` - Path relative to the root of the tree.
///
/// # Returns
///
/// true if the path exists in the tree.
fn tree_contains_path<'repo>(
    repo: &'repo Repository,
    tree: &Tree<'repo>,
    file_path: &str,
) -> Result<bool> {
    let path = Path::new(file_path);
    let mut segments = vec![];
    for component in path.components() {
        match component {
            Component::Normal(segment) => match segment.to_str() {
                Some(segment) => segments.push(segment),
                None => return Ok(false),
            },
            Component::CurDir => continue,
            _ => bail!("Unsupported path for repository lookup: {}", file_path),
        }
    }

    let (file_name, directories) = match segments.split_last() {
        Some(split) => split,
        None => return Ok(false),
    };

    let mut current = tree.clone();
    for directory in directories {
        let next = match current.get_name(directory) {
            Some(entry) if entry.kind() == Some(ObjectType::Tree) => {
                entry.to_object(repo)?.peel_to_tree()?
            }
            _ => return Ok(false),
        };
        current = next;
    }

    let exists = current.get_name(file_name).is_some();
    Ok(exists)
}
