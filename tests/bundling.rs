//! End-to-end bundling and unbundling through the public API.

use offload_bundle::{
    archive, BundlerConfig, Error, FilesType, OffloadBundler, OFFLOAD_BUNDLE_MAGIC,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const HOST: &str = "host-x86_64-unknown-linux-gnu-";
const HIP_GFX906: &str = "hip-amdgcn-amd-amdhsa--gfx906";
const OPENMP_GFX906: &str = "openmp-amdgcn-amd-amdhsa--gfx906";

fn write_file(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn config(files_type: FilesType) -> BundlerConfig {
    BundlerConfig {
        files_type,
        ..BundlerConfig::default()
    }
}

fn bundle(
    files_type: FilesType,
    alignment: u64,
    targets: &[&str],
    inputs: &[PathBuf],
    output: &Path,
) {
    let bundler = OffloadBundler::new(BundlerConfig {
        bundle_alignment: alignment,
        target_names: targets.iter().map(|t| t.to_string()).collect(),
        input_file_names: inputs.to_vec(),
        output_file_names: vec![output.to_path_buf()],
        host_input_index: 0,
        ..config(files_type)
    });
    bundler.bundle_files().unwrap();
}

fn unbundle_config(
    files_type: FilesType,
    targets: &[&str],
    input: &Path,
    outputs: &[PathBuf],
) -> BundlerConfig {
    BundlerConfig {
        target_names: targets.iter().map(|t| t.to_string()).collect(),
        input_file_names: vec![input.to_path_buf()],
        output_file_names: outputs.to_vec(),
        ..config(files_type)
    }
}

fn u64le_at(data: &[u8], pos: usize) -> u64 {
    u64::from_le_bytes(data[pos..pos + 8].try_into().unwrap())
}

#[test]
fn binary_round_trip_with_alignment() {
    let dir = TempDir::new().unwrap();
    let input_a = write_file(&dir, "host.bc", b"hello");
    let input_b = write_file(&dir, "device.bc", b"world\n12345");
    let bundled = dir.path().join("bundle.bc");

    bundle(
        FilesType::Bc,
        4096,
        &[HOST, HIP_GFX906],
        &[input_a, input_b],
        &bundled,
    );

    // Magic at offset 0, entry count at 24, first payload at one full
    // alignment step.
    let container = std::fs::read(&bundled).unwrap();
    assert_eq!(&container[..24], OFFLOAD_BUNDLE_MAGIC.as_bytes());
    assert_eq!(u64le_at(&container, 24), 2);
    let offset_0 = u64le_at(&container, 32);
    let size_0 = u64le_at(&container, 40);
    assert_eq!(offset_0, 4096);
    assert_eq!(size_0, 5);

    let out_a = dir.path().join("host.out");
    let out_b = dir.path().join("device.out");
    let bundler = OffloadBundler::new(unbundle_config(
        FilesType::Bc,
        &[HOST, HIP_GFX906],
        &bundled,
        &[out_a.clone(), out_b.clone()],
    ));
    bundler.unbundle_files().unwrap();

    assert_eq!(std::fs::read(&out_a).unwrap(), b"hello");
    assert_eq!(std::fs::read(&out_b).unwrap(), b"world\n12345");
}

#[test]
fn text_container_layout_and_round_trip() {
    let dir = TempDir::new().unwrap();
    let input_a = write_file(&dir, "host.ll", b"define @a\n");
    let input_b = write_file(&dir, "device.ll", b"define @b\n");
    let bundled = dir.path().join("bundle.ll");

    bundle(
        FilesType::Ll,
        1,
        &[HOST, OPENMP_GFX906],
        &[input_a, input_b],
        &bundled,
    );

    let expected = format!(
        "\n; {magic}__START__ {host}\ndefine @a\n\n; {magic}__END__ {host}\n\
         \n; {magic}__START__ {omp}\ndefine @b\n\n; {magic}__END__ {omp}\n",
        magic = OFFLOAD_BUNDLE_MAGIC,
        host = HOST,
        omp = OPENMP_GFX906,
    );
    assert_eq!(std::fs::read(&bundled).unwrap(), expected.as_bytes());

    let out_a = dir.path().join("host.out");
    let out_b = dir.path().join("device.out");
    let bundler = OffloadBundler::new(unbundle_config(
        FilesType::Ll,
        &[HOST, OPENMP_GFX906],
        &bundled,
        &[out_a.clone(), out_b.clone()],
    ));
    bundler.unbundle_files().unwrap();

    assert_eq!(std::fs::read(&out_a).unwrap(), b"define @a\n");
    assert_eq!(std::fs::read(&out_b).unwrap(), b"define @b\n");
}

#[test]
fn unbundle_falls_back_to_host_for_plain_input() {
    let dir = TempDir::new().unwrap();
    let source = b"int main(){}\n";
    let input = write_file(&dir, "main.i", source);

    let out_host = dir.path().join("h.out");
    let out_openmp = dir.path().join("o.out");
    let bundler = OffloadBundler::new(unbundle_config(
        FilesType::I,
        &[HOST, OPENMP_GFX906],
        &input,
        &[out_host.clone(), out_openmp.clone()],
    ));
    bundler.unbundle_files().unwrap();

    assert_eq!(std::fs::read(&out_host).unwrap(), source);
    assert_eq!(std::fs::read(&out_openmp).unwrap(), b"");
}

#[test]
fn unbundle_falls_back_to_host_for_non_bundle_binary() {
    let dir = TempDir::new().unwrap();
    let source = b"\x00\x01\x02 not a bundle";
    let input = write_file(&dir, "blob.bc", source);

    let out = dir.path().join("h.out");
    let bundler = OffloadBundler::new(unbundle_config(
        FilesType::Bc,
        &[HOST],
        &input,
        &[out.clone()],
    ));
    bundler.unbundle_files().unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), source);
}

#[test]
fn hip_bundle_satisfies_openmp_request() {
    let dir = TempDir::new().unwrap();
    let input_a = write_file(&dir, "host.bc", b"host-code");
    let input_b = write_file(&dir, "device.bc", b"gfx906-code");
    let bundled = dir.path().join("bundle.bc");

    bundle(
        FilesType::Bc,
        1,
        &[HOST, HIP_GFX906],
        &[input_a, input_b],
        &bundled,
    );

    let out = dir.path().join("openmp.out");
    let bundler = OffloadBundler::new(BundlerConfig {
        hip_openmp_compatible: true,
        ..unbundle_config(FilesType::Bc, &[OPENMP_GFX906], &bundled, &[out.clone()])
    });
    bundler.unbundle_files().unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), b"gfx906-code");
}

#[test]
fn missing_bundles_policy() {
    let dir = TempDir::new().unwrap();
    let input = write_file(&dir, "host.bc", b"host-only");
    let bundled = dir.path().join("bundle.bc");
    bundle(FilesType::Bc, 1, &[HOST], &[input], &bundled);

    let out_host = dir.path().join("host.out");
    let out_hip = dir.path().join("hip.out");
    let outputs = [out_host.clone(), out_hip.clone()];

    let strict = OffloadBundler::new(unbundle_config(
        FilesType::Bc,
        &[HOST, HIP_GFX906],
        &bundled,
        &outputs,
    ));
    let err = strict.unbundle_files().unwrap_err();
    assert!(matches!(err, Error::MissingBundles(_)));
    assert_eq!(
        err.to_string(),
        "Can't find bundles for hip-amdgcn-amd-amdhsa--gfx906"
    );

    let lenient = OffloadBundler::new(BundlerConfig {
        allow_missing_bundles: true,
        ..unbundle_config(FilesType::Bc, &[HOST, HIP_GFX906], &bundled, &outputs)
    });
    lenient.unbundle_files().unwrap();
    assert_eq!(std::fs::read(&out_host).unwrap(), b"host-only");
    assert_eq!(std::fs::read(&out_hip).unwrap(), b"");
}

#[test]
fn list_ids_in_storage_order() {
    let dir = TempDir::new().unwrap();
    let input_a = write_file(&dir, "host.bc", b"a");
    let input_b = write_file(&dir, "device.bc", b"b");
    let bundled = dir.path().join("bundle.bc");
    bundle(
        FilesType::Bc,
        1,
        &[HOST, HIP_GFX906],
        &[input_a, input_b],
        &bundled,
    );

    let bundler = OffloadBundler::new(BundlerConfig {
        input_file_names: vec![bundled],
        ..config(FilesType::Bc)
    });
    let mut listing = Vec::new();
    bundler.list_bundle_ids_to(&mut listing).unwrap();
    assert_eq!(listing, format!("{HOST}\n{HIP_GFX906}\n").as_bytes());
}

fn bundle_bytes(dir: &TempDir, tag: &str, host: &[u8], device: &[u8]) -> Vec<u8> {
    let input_a = write_file(dir, &format!("{tag}-host.bc"), host);
    let input_b = write_file(dir, &format!("{tag}-device.bc"), device);
    let bundled = dir.path().join(format!("{tag}.bc"));
    bundle(
        FilesType::Bc,
        1,
        &[HOST, HIP_GFX906],
        &[input_a, input_b],
        &bundled,
    );
    std::fs::read(&bundled).unwrap()
}

#[test]
fn archive_unbundle_extracts_device_members() {
    let dir = TempDir::new().unwrap();

    let members = vec![
        archive::NewArchiveMember {
            name: "member1.o".to_string(),
            data: bundle_bytes(&dir, "m1", b"host-1", b"device-1"),
        },
        archive::NewArchiveMember {
            name: "member2.o".to_string(),
            data: bundle_bytes(&dir, "m2", b"host-2", b"device-2"),
        },
    ];
    let library = dir.path().join("libfat.a");
    archive::write_archive(&library, &members, archive::ArchiveKind::Gnu).unwrap();

    let out = dir.path().join("libdevice.a");
    let bundler = OffloadBundler::new(unbundle_config(
        FilesType::A,
        &[HIP_GFX906],
        &library,
        &[out.clone()],
    ));
    bundler.unbundle_archive().unwrap();

    let device_archive = std::fs::read(&out).unwrap();
    let extracted = archive::parse_archive(&device_archive).unwrap();
    assert_eq!(extracted.len(), 2);
    assert_eq!(
        extracted[0].name,
        "member1-hip-amdgcn-amd-amdhsa--gfx906.bc"
    );
    assert_eq!(extracted[0].data, b"device-1");
    assert_eq!(
        extracted[1].name,
        "member2-hip-amdgcn-amd-amdhsa--gfx906.bc"
    );
    assert_eq!(extracted[1].data, b"device-2");
}

#[test]
fn archive_unbundle_multi_match() {
    let dir = TempDir::new().unwrap();
    let members = vec![archive::NewArchiveMember {
        name: "kernels.o".to_string(),
        data: bundle_bytes(&dir, "k", b"host", b"device"),
    }];
    let library = dir.path().join("libfat.a");
    archive::write_archive(&library, &members, archive::ArchiveKind::Gnu).unwrap();

    // One stored HIP slice serves both the OpenMP and the HIP request.
    let out_openmp = dir.path().join("libopenmp.a");
    let out_hip = dir.path().join("libhip.a");
    let bundler = OffloadBundler::new(BundlerConfig {
        hip_openmp_compatible: true,
        ..unbundle_config(
            FilesType::A,
            &[OPENMP_GFX906, HIP_GFX906],
            &library,
            &[out_openmp.clone(), out_hip.clone()],
        )
    });
    bundler.unbundle_archive().unwrap();

    for out in [&out_openmp, &out_hip] {
        let out_bytes = std::fs::read(out).unwrap();
        let extracted = archive::parse_archive(&out_bytes).unwrap();
        assert_eq!(extracted.len(), 1);
        assert_eq!(
            extracted[0].name,
            "kernels-hip-amdgcn-amd-amdhsa--gfx906.bc"
        );
        assert_eq!(extracted[0].data, b"device");
    }
}

#[test]
fn archive_unbundle_missing_target_policy() {
    let dir = TempDir::new().unwrap();
    let members = vec![archive::NewArchiveMember {
        name: "kernels.o".to_string(),
        data: bundle_bytes(&dir, "k", b"host", b"device"),
    }];
    let library = dir.path().join("libfat.a");
    archive::write_archive(&library, &members, archive::ArchiveKind::Gnu).unwrap();

    let sm_target = "openmp-nvptx64-nvidia-cuda--sm_80";
    let out = dir.path().join("libsm.a");

    let strict = OffloadBundler::new(unbundle_config(
        FilesType::A,
        &[sm_target],
        &library,
        &[out.clone()],
    ));
    let err = strict.unbundle_archive().unwrap_err();
    assert!(matches!(err, Error::NoCompatibleForTarget { .. }));

    let lenient = OffloadBundler::new(BundlerConfig {
        allow_missing_bundles: true,
        ..unbundle_config(FilesType::A, &[sm_target], &library, &[out.clone()])
    });
    lenient.unbundle_archive().unwrap();
    let out_bytes = std::fs::read(&out).unwrap();
    let extracted = archive::parse_archive(&out_bytes).unwrap();
    assert!(extracted.is_empty());
}

/// Build a relocatable ELF64 little-endian image holding the given named
/// sections.
fn build_elf64(sections: &[(&str, &[u8])]) -> Vec<u8> {
    let mut shstrtab = vec![0u8];
    let mut name_offsets = Vec::new();
    for (name, _) in sections {
        name_offsets.push(shstrtab.len());
        shstrtab.extend_from_slice(name.as_bytes());
        shstrtab.push(0);
    }
    let strtab_name_off = shstrtab.len();
    shstrtab.extend_from_slice(b".shstrtab\0");

    let ehsize = 64usize;
    let mut contents_off = ehsize;
    let mut content_ranges = Vec::new();
    for (_, data) in sections {
        content_ranges.push((contents_off, data.len()));
        contents_off += data.len();
    }
    let strtab_off = contents_off;
    let sh_off = strtab_off + shstrtab.len();
    let sh_num = sections.len() + 2;

    let mut image = Vec::new();
    image.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
    image.extend_from_slice(&[0; 8]);
    image.extend_from_slice(&1u16.to_le_bytes());
    image.extend_from_slice(&0x3eu16.to_le_bytes());
    image.extend_from_slice(&1u32.to_le_bytes());
    image.extend_from_slice(&0u64.to_le_bytes());
    image.extend_from_slice(&0u64.to_le_bytes());
    image.extend_from_slice(&(sh_off as u64).to_le_bytes());
    image.extend_from_slice(&0u32.to_le_bytes());
    image.extend_from_slice(&64u16.to_le_bytes());
    image.extend_from_slice(&0u16.to_le_bytes());
    image.extend_from_slice(&0u16.to_le_bytes());
    image.extend_from_slice(&64u16.to_le_bytes());
    image.extend_from_slice(&(sh_num as u16).to_le_bytes());
    image.extend_from_slice(&((sh_num - 1) as u16).to_le_bytes());
    assert_eq!(image.len(), ehsize);

    for (_, data) in sections {
        image.extend_from_slice(data);
    }
    image.extend_from_slice(&shstrtab);

    let mut shdr = |name_off: usize, sh_type: u32, offset: usize, size: usize| {
        image.extend_from_slice(&(name_off as u32).to_le_bytes());
        image.extend_from_slice(&sh_type.to_le_bytes());
        image.extend_from_slice(&[0; 16]); // sh_flags, sh_addr
        image.extend_from_slice(&(offset as u64).to_le_bytes());
        image.extend_from_slice(&(size as u64).to_le_bytes());
        image.extend_from_slice(&[0; 24]); // sh_link .. sh_entsize
    };
    shdr(0, 0, 0, 0);
    for (i, (_, data)) in sections.iter().enumerate() {
        shdr(name_offsets[i], 1, content_ranges[i].0, data.len());
    }
    shdr(strtab_name_off, 3, strtab_off, shstrtab.len());
    image
}

#[test]
fn object_unbundle_reads_sections_and_host_sentinel() {
    let dir = TempDir::new().unwrap();
    let host_section = format!("{OFFLOAD_BUNDLE_MAGIC}{HOST}");
    let hip_section = format!("{OFFLOAD_BUNDLE_MAGIC}{HIP_GFX906}");
    let image = build_elf64(&[
        (".text", b"\x90\x90\x90"),
        (&host_section, b"\0"),
        (&hip_section, b"device-image"),
    ]);
    let input = write_file(&dir, "fat.o", &image);

    let out_host = dir.path().join("host.o");
    let out_hip = dir.path().join("hip.bc");
    let bundler = OffloadBundler::new(unbundle_config(
        FilesType::O,
        &[HOST, HIP_GFX906],
        &input,
        &[out_host.clone(), out_hip.clone()],
    ));
    bundler.unbundle_files().unwrap();

    // The host sentinel expands to the whole fat object.
    assert_eq!(std::fs::read(&out_host).unwrap(), image);
    assert_eq!(std::fs::read(&out_hip).unwrap(), b"device-image");
}

#[test]
fn object_bundle_prints_objcopy_command() {
    let dir = TempDir::new().unwrap();
    let host_object = build_elf64(&[(".text", b"\x90")]);
    let input_host = write_file(&dir, "host.o", &host_object);
    let input_dev = write_file(&dir, "device.bc", b"device");
    let output = dir.path().join("fat.o");

    let bundler = OffloadBundler::new(BundlerConfig {
        print_external_commands: true,
        host_input_index: 0,
        target_names: vec![HOST.to_string(), HIP_GFX906.to_string()],
        input_file_names: vec![input_host, input_dev],
        output_file_names: vec![output.clone()],
        ..config(FilesType::O)
    });
    // The command is printed instead of executed; the operation still
    // succeeds and leaves the (empty) output file behind.
    bundler.bundle_files().unwrap();
    assert!(output.exists());
}
