//! The build steps, in registry order.
//!
//! Each step reads and updates the [`BuildContext`] through a
//! [`StepContext`] and leaves its filesystem results under the work
//! directory for the steps after it.

use std::fs::OpenOptions;
use std::path::Path;

use super::StepContext;
use crate::bootloader::prepare_bootloader;
use crate::config::RootfsSource;
use crate::content::{ContentWriter, StructurePaths};
use crate::context::BuildContext;
use crate::error::{BuildError, IoContext, Result};
use crate::host::fs::atomic_move;
use crate::host::Host;
use crate::hooks::{run_hook_point, POST_POPULATE_ROOTFS, POST_POPULATE_VOLUMES};
use crate::layout::{
    self, calculate_image_size, iec, round_up, volume_image_size, write_offset_values,
    write_partition_table, Layout, Role, Structure, MIB,
};
use crate::livebuild::LiveBuild;
use crate::output::Output;
use crate::process::Cmd;

/// Headroom added on top of the measured rootfs footprint.
const ROOTFS_SLACK: u64 = 8 * MIB;

pub fn make_temporary_directories(cx: &mut StepContext<'_>) -> Result<()> {
    for dir in cx.build.dirs.all() {
        cx.host
            .fs
            .create_dir_all(dir)
            .io_context(|| format!("Error creating temporary directory '{}'", dir.display()))?;
    }
    Ok(())
}

pub fn load_layout(cx: &mut StepContext<'_>) -> Result<()> {
    let path = &cx.build.config.layout;
    let mut layout = layout::load_layout(path).map_err(|e| BuildError::Descriptor {
        path: path.display().to_string(),
        message: format!("{:#}", e),
    })?;
    layout.resolve_offsets()?;
    let image_size = calculate_image_size(Some(&layout))?;
    tracing::info!(volumes = ?layout.volume_order, image_size = %iec(image_size), "layout loaded");
    cx.build.layout = Some(layout);
    Ok(())
}

pub fn prepare_gadget_tree(cx: &mut StepContext<'_>) -> Result<()> {
    let config = &cx.build.config;
    let gadget = cx.build.dirs.gadget();
    cx.host
        .fs
        .copy_tree(&config.gadget_dir, &gadget)
        .io_context(|| format!("Error copying gadget tree '{}'", config.gadget_dir.display()))?;

    if let Some(assets) = &config.boot_assets {
        let boot = cx.build.dirs.unpack.join("image/boot");
        cx.host
            .fs
            .copy_tree(assets, &boot)
            .io_context(|| format!("Error copying boot assets '{}'", assets.display()))?;
    }
    Ok(())
}

pub fn build_rootfs(cx: &mut StepContext<'_>) -> Result<()> {
    match &cx.build.config.rootfs {
        RootfsSource::Tree(tree) => {
            if !tree.is_dir() {
                return Err(BuildError::io(
                    format!("Error locating rootfs tree '{}'", tree.display()),
                    std::io::Error::from(std::io::ErrorKind::NotFound),
                ));
            }
            cx.build.built_tree = Some(tree.clone());
        }
        RootfsSource::LiveBuild(lb) => {
            let chroot = &cx.build.dirs.chroot;
            let (mut config, mut build) = LiveBuild::from_env().setup_build_commands(
                cx.host,
                chroot,
                &lb.arch,
                &lb.extra_args,
                lb.cross_build,
            )?;
            for (key, value) in &lb.env {
                config = config.env(key.clone(), value.clone());
                build = build.env(key.clone(), value.clone());
            }
            run_tool(cx.host, &config, "Error running lb config")?;
            run_tool(cx.host, &build, "Error running lb build")?;
            // live-build leaves the finished tree in <root>/chroot.
            cx.build.built_tree = Some(chroot.join("chroot"));
        }
    }
    Ok(())
}

fn run_tool(host: &Host, cmd: &Cmd, context: &str) -> Result<()> {
    let output = host.runner.run(cmd).io_context(|| context.to_string())?;
    if !output.success() {
        return Err(BuildError::tool(context, output.failure_summary()));
    }
    Ok(())
}

pub fn populate_rootfs_contents(cx: &mut StepContext<'_>) -> Result<()> {
    let built = cx.build.built_tree.clone().ok_or_else(|| {
        BuildError::Validation("no rootfs has been built; run build_rootfs first".into())
    })?;
    let rootfs = &cx.build.dirs.rootfs;
    cx.host
        .fs
        .copy_tree(&built, rootfs)
        .io_context(|| format!("Error copying rootfs from '{}'", built.display()))?;

    run_hook_point(
        cx.host,
        &cx.build.config.hook_dirs,
        POST_POPULATE_ROOTFS,
        rootfs,
        cx.output,
        cx.debug,
    )
}

pub fn calculate_rootfs_size(cx: &mut StepContext<'_>) -> Result<()> {
    let footprint = layout::calculate_rootfs_size(&cx.build.dirs.rootfs)?;
    // Rounded so a grown rootfs structure stays sector-aligned.
    cx.build.rootfs_size = round_up(
        footprint * 3 / 2 + ROOTFS_SLACK,
        cx.build.config.sector_size,
    );
    tracing::info!(
        footprint = %iec(footprint),
        size = %iec(cx.build.rootfs_size),
        "measured rootfs"
    );
    Ok(())
}

pub fn populate_bootfs_contents(cx: &mut StepContext<'_>) -> Result<()> {
    let build = &*cx.build;
    let layout = require_layout(build)?;
    let gadget = build.dirs.gadget();

    for (name, volume) in layout.ordered() {
        let mut boot_root = None;
        for (index, structure) in volume.structures.iter().enumerate() {
            if structure.filesystem.is_none() || uses_rootfs(structure) {
                continue;
            }
            let root = build.dirs.structure_root(name, index);
            cx.host
                .fs
                .create_dir_all(&root)
                .io_context(|| format!("Error creating '{}'", root.display()))?;
            copy_tree_content(cx.host, structure, &gadget, &root)?;
            if structure.has_role(Role::SystemBoot) && boot_root.is_none() {
                boot_root = Some(root);
            }
        }

        if let Some(bootloader) = volume.bootloader {
            prepare_bootloader(cx.host, bootloader, &build.dirs.unpack, boot_root.as_deref())?;
        }
    }
    Ok(())
}

/// Copy a structure's `source → target` content entries into `root`.
fn copy_tree_content(host: &Host, structure: &Structure, gadget: &Path, root: &Path) -> Result<()> {
    for (source, target) in structure.tree_content() {
        let src = gadget.join(source);
        let mut dst = root.join(target);
        let context = || format!("Error copying gadget content '{}'", src.display());

        if src.is_dir() {
            host.fs.copy_tree(&src, &dst).io_context(context)?;
            continue;
        }
        // A trailing slash names a directory to copy into.
        if target.to_string_lossy().ends_with('/') {
            if let Some(file_name) = src.file_name() {
                dst = dst.join(file_name);
            }
        }
        if let Some(parent) = dst.parent() {
            host.fs.create_dir_all(parent).io_context(context)?;
        }
        host.fs.copy_file(&src, &dst).io_context(context)?;
    }
    Ok(())
}

pub fn populate_prepare_partitions(cx: &mut StepContext<'_>) -> Result<()> {
    let mut layout = cx.build.layout.take().ok_or_else(not_initialized)?;
    let result = prepare_volumes(cx.host, cx.output, cx.build, &mut layout);
    cx.build.layout = Some(layout);
    result?;

    run_hook_point(
        cx.host,
        &cx.build.config.hook_dirs,
        POST_POPULATE_VOLUMES,
        &cx.build.dirs.volumes,
        cx.output,
        cx.debug,
    )
}

fn prepare_volumes(
    host: &Host,
    output: &mut Output,
    build: &mut BuildContext,
    layout: &mut Layout,
) -> Result<()> {
    let writer = ContentWriter::new(host)
        .with_block_size(build.config.block_size)
        .with_sector_size(build.config.sector_size)
        .with_rootfs_size(build.rootfs_size);
    let gadget = build.dirs.gadget();

    for name in layout.volume_order.clone() {
        let Some(volume) = layout.volumes.get_mut(&name) else {
            continue;
        };
        let volume_dir = build.dirs.volume_dir(&name);
        host.fs
            .create_dir_all(&volume_dir)
            .io_context(|| format!("Error creating '{}'", volume_dir.display()))?;

        // The table has to go down before any content: sfdisk rewrites the
        // first sector, boot code included.
        writer.reconcile_rootfs(volume, output)?;
        let image = build.dirs.volume_image(&name);
        host.fs
            .create_sized(&image, volume_image_size(volume, build.config.sector_size)?)
            .io_context(|| format!("Error creating disk image '{}'", image.display()))?;
        write_partition_table(host, volume, &image, build.config.sector_size)?;

        for index in 0..volume.structures.len() {
            let content_root = if uses_rootfs(&volume.structures[index]) {
                build.dirs.rootfs.clone()
            } else {
                build.dirs.structure_root(&name, index)
            };
            let paths = StructurePaths {
                content_root: &content_root,
                gadget_dir: &gadget,
                staging_dir: &volume_dir,
                image: &image,
            };
            writer.copy_structure_content(volume, index, &paths, output)?;
        }
        build.images.insert(name.clone(), image);
    }
    Ok(())
}

pub fn make_disk(cx: &mut StepContext<'_>) -> Result<()> {
    let build = &mut *cx.build;
    let layout = build.layout.as_ref().ok_or_else(not_initialized)?;
    let sector_size = build.config.sector_size;

    for (name, volume) in layout.ordered() {
        let image = build.images.get(name).ok_or_else(|| {
            BuildError::Geometry(format!(
                "volume '{}' has no image; run populate_prepare_partitions first",
                name
            ))
        })?;
        let size = volume_image_size(volume, sector_size)?;

        // Content never shrinks an image; it can only have grown past size.
        let file = OpenOptions::new()
            .write(true)
            .open(image)
            .io_context(|| format!("Error opening disk image '{}'", image.display()))?;
        let current = file
            .metadata()
            .io_context(|| format!("Error reading disk image '{}'", image.display()))?
            .len();
        if current < size {
            file.set_len(size)
                .io_context(|| format!("Error sizing disk image '{}'", image.display()))?;
        }
        let size = current.max(size);

        write_offset_values(volume, image, sector_size)?;
        tracing::info!(volume = name, size = %iec(size), "disk image ready");
        build.image_sizes.insert(name.to_string(), size);
    }
    Ok(())
}

pub fn finish(cx: &mut StepContext<'_>) -> Result<()> {
    let build = &mut *cx.build;
    let output_dir = build.config.output_dir.clone();
    cx.host
        .fs
        .create_dir_all(&output_dir)
        .io_context(|| format!("Error creating output directory '{}'", output_dir.display()))?;

    for (name, image) in build.images.iter_mut() {
        let dest = output_dir.join(format!("{}.img", name));
        if *image == dest {
            continue;
        }
        atomic_move(image, &dest).io_context(|| {
            format!("Error moving '{}' to '{}'", image.display(), dest.display())
        })?;
        tracing::info!(volume = %name, path = %dest.display(), "published image");
        *image = dest;
    }
    Ok(())
}

fn uses_rootfs(structure: &Structure) -> bool {
    structure.role.is_some_and(|r| r.uses_rootfs())
}

fn require_layout(build: &BuildContext) -> Result<&Layout> {
    build.layout.as_ref().ok_or_else(not_initialized)
}

fn not_initialized() -> BuildError {
    BuildError::Geometry("layout has not been loaded; run load_layout first".into())
}
