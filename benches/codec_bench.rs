use criterion::{black_box, criterion_group, criterion_main, Criterion};
use coffre::codec::{aes, huffman, seal};

fn bench_codec(c: &mut Criterion) {
    // Skewed text-like input: the Huffman path actually engages.
    let text: Vec<u8> = b"the quick brown fox jumps over the lazy dog 0123456789\n"
        .iter()
        .copied()
        .cycle()
        .take(1024 * 1024)
        .collect();
    let key = b"bench-account-key";

    c.bench_function("huffman_compress_1mb", |b| {
        b.iter(|| huffman::compress(black_box(&text)))
    });
    let frame = huffman::compress(&text);
    c.bench_function("huffman_decompress_1mb", |b| {
        b.iter(|| huffman::decompress(black_box(&frame)).unwrap())
    });
    c.bench_function("aes_encrypt_1mb", |b| b.iter(|| aes::encrypt(black_box(&text), key)));
    let sealed = aes::encrypt(&text, key);
    c.bench_function("aes_decrypt_1mb", |b| {
        b.iter(|| aes::decrypt(black_box(&sealed), key).unwrap())
    });
    c.bench_function("seal_1mb", |b| b.iter(|| seal(black_box(&text), key)));
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);
