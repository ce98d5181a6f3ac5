//! CLI command definitions and handlers.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;

use porter_common::{ContainerId, PorterPaths};

use crate::engine::{CommonConfig, ENGINE_NAME, EngineConfig, StateManager, cleanup_container};
use crate::filesystem::LocalExecutor;

/// Porter - Container Creation Engine
#[derive(Parser)]
#[command(name = "porter")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Root directory for porter state and sessions
    #[arg(long, global = true, env = "PORTER_ROOT")]
    pub root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Porter commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Create a container and run its payload
    Create {
        /// Container ID
        container_id: String,

        /// Root filesystem image: packed container, raw squashfs or
        /// ext3 image, or a sandbox directory
        image: PathBuf,

        /// Path to an OCI bundle providing config.json
        #[arg(short, long)]
        bundle: Option<PathBuf>,

        /// Open the image writable
        #[arg(long)]
        writable: bool,

        /// Skip the overlay layer and enter the rootfs directly
        #[arg(long)]
        overlay_disabled: bool,

        /// Writable image backing the overlay upper layer
        #[arg(long)]
        overlay_image: Option<PathBuf>,

        /// Mount fresh /tmp and /dev instead of inheriting the host's
        #[arg(long)]
        contain: bool,

        /// Detach after creation instead of monitoring the payload
        #[arg(long)]
        instance: bool,
    },

    /// Query container state
    State {
        /// Container ID
        container_id: String,
    },

    /// Delete a container
    Delete {
        /// Container ID
        container_id: String,

        /// Delete even if the container is not in a deletable state
        #[arg(short, long)]
        force: bool,
    },

    /// List containers
    List,
}

impl Cli {
    /// Execute the CLI command.
    pub fn execute(self) -> Result<()> {
        let paths = self
            .root
            .map_or_else(PorterPaths::new, PorterPaths::with_root);

        match self.command {
            Commands::Create {
                container_id,
                image,
                bundle,
                writable,
                overlay_disabled,
                overlay_image,
                contain,
                instance,
            } => {
                let container_id = ContainerId::new(container_id)
                    .map_err(|e| color_eyre::eyre::eyre!("Invalid container ID: {}", e))?;

                let spec = match bundle {
                    Some(bundle) => {
                        let spec_path = bundle.join("config.json");
                        if !spec_path.exists() {
                            return Err(color_eyre::eyre::eyre!(
                                "Bundle config.json not found at {}",
                                spec_path.display()
                            ));
                        }
                        let spec_json = std::fs::read_to_string(&spec_path)?;
                        serde_json::from_str(&spec_json)?
                    }
                    None => porter_oci::Spec::default(),
                };

                let config = CommonConfig {
                    engine_name: ENGINE_NAME.to_string(),
                    container_id,
                    engine_config: EngineConfig {
                        image,
                        writable_image: writable,
                        overlay_image,
                        overlay_fs_enabled: !overlay_disabled,
                        contain,
                        is_instance: instance,
                    },
                    spec,
                };

                paths.create_dirs()?;

                let code = crate::engine::run(config, paths)
                    .map_err(|e| color_eyre::eyre::eyre!("Failed to create container: {}", e))?;

                std::process::exit(code)
            }

            Commands::State { container_id } => {
                let state = StateManager::new(paths)
                    .load(&container_id)
                    .map_err(|e| color_eyre::eyre::eyre!("Failed to load container: {}", e))?;

                println!("{}", serde_json::to_string_pretty(&state)?);
                Ok(())
            }

            Commands::Delete {
                container_id,
                force,
            } => {
                let state = StateManager::new(paths.clone())
                    .load(&container_id)
                    .map_err(|e| color_eyre::eyre::eyre!("Failed to load container: {}", e))?;

                if !force && !state.status.can_delete() {
                    return Err(color_eyre::eyre::eyre!(
                        "Container {} is {}; use --force to delete anyway",
                        container_id,
                        state.status
                    ));
                }

                cleanup_container(&container_id, &paths, &LocalExecutor::new())
                    .map_err(|e| color_eyre::eyre::eyre!("Failed to delete container: {}", e))?;

                println!("Container {} deleted", container_id);
                Ok(())
            }

            Commands::List => {
                let states = StateManager::new(paths)
                    .list()
                    .map_err(|e| color_eyre::eyre::eyre!("Failed to list containers: {}", e))?;

                println!("ID\tSTATUS\tBUNDLE");
                for state in states {
                    println!("{}\t{}\t{}", state.id, state.status, state.bundle.display());
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn create_overlay_is_on_by_default() {
        let cli = Cli::parse_from(["porter", "create", "c1", "/images/sys.img"]);
        match cli.command {
            Commands::Create {
                overlay_disabled,
                writable,
                instance,
                ..
            } => {
                assert!(!overlay_disabled);
                assert!(!writable);
                assert!(!instance);
            }
            _ => panic!("expected create"),
        }
    }
}
