//! Benchmarks for interval sets, allocator rebuilds and archive writes

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::SeedableRng;
use vaultpack::core::allocator::extent::IntervalSet;
use vaultpack::core::allocator::BlockAllocator;
use vaultpack::core::inventory::{FileEntry, Inventory};
use vaultpack::{ArchiveBuilder, CompressionMethod, Encryption, WriteOptions};

/// Inventory of `files` files, each owning every other block of its span
fn fragmented_inventory(files: u64) -> Inventory {
    let mut inventory = Inventory::default();
    for i in 0..files {
        let mut file = FileEntry::new(format!("f{}", i));
        for block in (i * 64..(i + 1) * 64).step_by(2) {
            file.blocks.insert(block);
        }
        inventory.root.files.push(file);
    }
    inventory
}

fn benchmark_interval_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("interval_set_insert");

    for size in [1_000u64, 10_000, 100_000].iter() {
        group.bench_with_input(BenchmarkId::new("sequential", size), size, |b, &size| {
            b.iter(|| {
                let mut set = IntervalSet::new();
                for id in 0..size {
                    set.insert(black_box(id));
                }
                set
            });
        });
        group.bench_with_input(BenchmarkId::new("strided", size), size, |b, &size| {
            b.iter(|| {
                let mut set = IntervalSet::new();
                for id in (0..size * 2).step_by(2) {
                    set.insert(black_box(id));
                }
                set
            });
        });
    }

    group.finish();
}

fn benchmark_allocator_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocator_rebuild");

    for files in [10u64, 100, 1000].iter() {
        let inventory = fragmented_inventory(*files);
        group.bench_with_input(BenchmarkId::from_parameter(files), &inventory, |b, inventory| {
            b.iter(|| BlockAllocator::new(black_box(inventory), &IntervalSet::new()));
        });
    }

    group.finish();
}

fn benchmark_allocate_into_holes(c: &mut Criterion) {
    let inventory = fragmented_inventory(100);

    c.bench_function("allocate_1000_into_holes", |b| {
        b.iter(|| {
            let mut allocator = BlockAllocator::new(&inventory, &IntervalSet::new());
            for _ in 0..1000 {
                black_box(allocator.allocate_next_block().unwrap());
            }
        });
    });
}

fn benchmark_archive_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("archive_write");
    let content = vec![0x5au8; 256 * 1024];
    group.throughput(Throughput::Bytes(content.len() as u64));

    let settings = [
        ("plain", Encryption::None, CompressionMethod::None),
        ("aes256", Encryption::Aes256Ctr, CompressionMethod::None),
        ("aes256_lz4", Encryption::Aes256Ctr, CompressionMethod::Lz4),
        ("twofish256_zstd", Encryption::Twofish256Ctr, CompressionMethod::Zstd),
    ];

    for (name, encryption, compression) in settings {
        let dir = tempfile::TempDir::new().unwrap();
        let mut archive = ArchiveBuilder::new()
            .path(dir.path().join("bench.vpk"))
            .block_size(4096)
            .rng(StdRng::seed_from_u64(0))
            .build()
            .unwrap();
        let options = WriteOptions::default()
            .encryption(encryption)
            .compression(compression);

        group.bench_function(name, |b| {
            b.iter(|| archive.write_with("/bench.bin", black_box(&content), options).unwrap());
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_interval_insert,
    benchmark_allocator_rebuild,
    benchmark_allocate_into_holes,
    benchmark_archive_write
);
criterion_main!(benches);
