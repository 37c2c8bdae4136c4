//! Cross-module pipeline tests: full filter stacks driven end to end.

use rand::{Rng, SeedableRng};

use nxio::cipher::{AesFilter, CipherMode, CryptoDir};
use nxio::codec::{Base64Encoder, HexDecoder, HexEncoder};
use nxio::compose::{shared, Concat, Limiter, Repeat, Tee};
use nxio::device::{Device, SeekPos};
use nxio::hash::{sha256, HashAlgorithm, HashFilter};
use nxio::mem::{dyn_sink, str_source, DynBuffer, MemBuffer};
use nxio::padding::{PadEncoder, Pkcs7Unpad};
use nxio::ring::{Shutdown, ThreadRing};

fn read_all(dev: &mut Device) -> Vec<u8> {
    let mut out = Vec::new();
    dev.read_to_end(&mut out).unwrap();
    out
}

#[test]
fn base64_over_cstring() {
    let src = str_source("any carnal pleasur").unwrap();
    let mut dev = Base64Encoder::open(src, "r").unwrap();
    assert_eq!(read_all(&mut dev), b"YW55IGNhcm5hbCBwbGVhc3Vy");
}

#[test]
fn cbc_pipeline_matches_sp800_38a() {
    // cstring -> pkcs7 pad -> aes-cbc encrypt, against the published vector.
    let key = hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap();
    let iv: [u8; 16] = hex::decode("000102030405060708090a0b0c0d0e0f")
        .unwrap()
        .try_into()
        .unwrap();
    let plain = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();

    let src = Device::open(MemBuffer::from_vec(plain.clone()), "r").unwrap();
    let padded = PadEncoder::pkcs7(src, 16, "r").unwrap();
    let mut enc = AesFilter::open(
        padded,
        &key,
        Some(iv),
        CipherMode::Cbc,
        CryptoDir::Encrypt,
        "r",
    )
    .unwrap();
    let cipher = read_all(&mut enc);

    assert_eq!(cipher.len(), 32);
    assert_eq!(
        hex::encode(&cipher[..16]),
        "7649abac8119b246cee98e9b12e9197d"
    );

    // And back: aes-cbc decrypt -> pkcs7 unpad.
    let src = Device::open(MemBuffer::from_vec(cipher), "r").unwrap();
    let dec = AesFilter::open(src, &key, Some(iv), CipherMode::Cbc, CryptoDir::Decrypt, "r")
        .unwrap();
    let mut unpad = Pkcs7Unpad::open(dec, 16, "r").unwrap();
    assert_eq!(read_all(&mut unpad), plain);
}

#[test]
fn encrypt_hex_pipeline_round_trip() {
    // client -> pkcs7 -> aes -> hex -> buffer, then buffer -> unhex -> aes -> unpad.
    let key = b"0123456789abcdef";
    let iv = [7u8; 16];
    let message = b"the quick brown fox jumps over the lazy dog";

    let (sink, bytes) = dyn_sink().unwrap();
    let hexed = HexEncoder::open(sink, "w").unwrap();
    let enc = AesFilter::open(hexed, key, Some(iv), CipherMode::Cbc, CryptoDir::Encrypt, "w")
        .unwrap();
    let mut pipeline = PadEncoder::pkcs7(enc, 16, "w").unwrap();
    pipeline.write_all(message).unwrap();
    pipeline.close().unwrap();

    let encoded = bytes.lock().clone();
    assert!(encoded.iter().all(u8::is_ascii_hexdigit));
    assert_eq!(encoded.len(), 48 * 2);

    let src = Device::open(DynBuffer::from_vec(encoded), "r").unwrap();
    let raw = HexDecoder::open(src, "r").unwrap();
    let dec = AesFilter::open(raw, key, Some(iv), CipherMode::Cbc, CryptoDir::Decrypt, "r")
        .unwrap();
    let mut plain = Pkcs7Unpad::open(dec, 16, "r").unwrap();
    assert_eq!(read_all(&mut plain), message);
}

#[test]
fn randomized_cipher_round_trips() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x6bc1bee2);
    for _ in 0..20 {
        let key_len = [16usize, 24, 32][rng.gen_range(0..3)];
        let key: Vec<u8> = (0..key_len).map(|_| rng.gen()).collect();
        let iv: [u8; 16] = rng.gen();
        let len = rng.gen_range(0..600);
        let plain: Vec<u8> = (0..len).map(|_| rng.gen()).collect();

        for mode in [
            CipherMode::Ecb,
            CipherMode::Cbc,
            CipherMode::Pcbc,
            CipherMode::Cfb,
            CipherMode::Ofb,
        ] {
            let iv_opt = if mode == CipherMode::Ecb { None } else { Some(iv) };
            let pad = !matches!(mode, CipherMode::Cfb | CipherMode::Ofb);

            let (sink, bytes) = dyn_sink().unwrap();
            let enc =
                AesFilter::open(sink, &key, iv_opt, mode, CryptoDir::Encrypt, "w").unwrap();
            let mut dev = if pad {
                PadEncoder::pkcs7(enc, 16, "w").unwrap()
            } else {
                enc
            };
            dev.write_all(&plain).unwrap();
            dev.close().unwrap();
            let cipher = bytes.lock().clone();

            let src = Device::open(DynBuffer::from_vec(cipher), "r").unwrap();
            let dec = AesFilter::open(src, &key, iv_opt, mode, CryptoDir::Decrypt, "r").unwrap();
            let mut dev = if pad {
                Pkcs7Unpad::open(dec, 16, "r").unwrap()
            } else {
                dec
            };
            assert_eq!(read_all(&mut dev), plain, "mode {:?} len {}", mode, len);
        }
    }
}

#[test]
fn incremental_hash_over_dynamic_buffer() {
    // Write "abc", read the digest, write "def", read again: the update-mode
    // filter digests the whole accumulated message.
    let (sink, _bytes) = dyn_sink().unwrap();
    let mut dev = HashFilter::open(sink, HashAlgorithm::Sha256, "rw+").unwrap();

    dev.write_all(b"abc").unwrap();
    let mut digest = [0u8; 32];
    assert_eq!(dev.read(&mut digest).unwrap(), 32);
    assert_eq!(digest, sha256(b"abc"));

    dev.write_all(b"def").unwrap();
    assert_eq!(dev.read(&mut digest).unwrap(), 32);
    assert_eq!(digest, sha256(b"abcdef"));
    dev.close().unwrap();
}

#[test]
fn hash_known_vectors_through_pipeline() {
    let cases: &[(&str, &str)] = &[
        ("", "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"),
        ("abc", "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"),
    ];
    for (input, want) in cases {
        let src = str_source(input).unwrap();
        let hashed = HashFilter::open(src, HashAlgorithm::Sha256, "r").unwrap();
        let mut hexed = HexEncoder::open(hashed, "r").unwrap();
        assert_eq!(read_all(&mut hexed), want.as_bytes());
    }
}

#[test]
fn repeat_through_limiter() {
    let src = str_source("ab").unwrap();
    let rep = Repeat::open(src).unwrap();
    let mut dev = Limiter::open(rep, Some(7), None, true, "r").unwrap();
    assert_eq!(read_all(&mut dev), b"abababa");
    assert!(dev.eof());
}

#[test]
fn tee_into_two_buffers() {
    let (left, left_bytes) = dyn_sink().unwrap();
    let (right, right_bytes) = dyn_sink().unwrap();
    let mut tee = Tee::open(shared(left), shared(right)).unwrap();
    tee.write_all(b"hello").unwrap();
    tee.flush().unwrap();
    assert_eq!(&*left_bytes.lock(), b"hello");
    assert_eq!(&*right_bytes.lock(), b"hello");
}

#[test]
fn tee_outputs_survive_tee_close() {
    // The tee only borrows its outputs: after it closes, both are still the
    // caller's devices, readable, writable and closable.
    let left = shared(Device::open(MemBuffer::new(32), "r+").unwrap());
    let (right, right_bytes) = dyn_sink().unwrap();
    let right = shared(right);

    let mut tee = Tee::open(left.clone(), right.clone()).unwrap();
    tee.write_all(b"teed").unwrap();
    tee.close().unwrap();

    // Left: seek back and read what the tee wrote, then keep writing.
    {
        let mut dev = left.lock();
        dev.seek(SeekPos::Start(0)).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(dev.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"teed");
    }

    // Right: keep writing after the tee is gone.
    right.lock().write_all(b" and more").unwrap();

    // Both remain the caller's to close.
    left.lock().close().unwrap();
    right.lock().close().unwrap();
    assert_eq!(&*right_bytes.lock(), b"teed and more");
}

#[test]
fn concat_feeds_hash() {
    let first = str_source("ab").unwrap();
    let second = str_source("c").unwrap();
    let cat = Concat::open(first, second).unwrap();
    let mut dev = HashFilter::open(cat, HashAlgorithm::Sha256, "r").unwrap();
    assert_eq!(read_all(&mut dev), sha256(b"abc"));
}

#[test]
fn buffer_write_flush_read_back() {
    let buf = MemBuffer::new(64);
    let contents = buf.contents();
    let mut dev = Device::open(buf, "r+").unwrap();
    dev.write_all(b"lossless round trip").unwrap();
    dev.flush().unwrap();
    dev.seek(SeekPos::Start(0)).unwrap();
    let mut out = vec![0u8; 19];
    assert_eq!(dev.read(&mut out).unwrap(), 19);
    assert_eq!(out, b"lossless round trip");
    drop(dev);
    assert_eq!(&contents.lock()[..19], b"lossless round trip");
}

#[test]
fn ring_framed_records_across_threads() {
    // Five writers, one reader, capacity 64: every record arrives intact.
    const WRITERS: usize = 5;
    const RECORDS: usize = 100_000;
    const RECORD_LEN: usize = 8;

    let ring = ThreadRing::new(64);
    let mut writers = Vec::new();
    for id in 0..WRITERS {
        let tx = ring.clone();
        writers.push(std::thread::spawn(move || {
            let mut dev = tx.device("w").unwrap();
            let mut record = [id as u8; RECORD_LEN];
            for seq in 0..RECORDS {
                let body = (seq % 251) as u8;
                record[1] = body;
                record[2..].fill(id as u8 ^ body);
                dev.write_all(&record).unwrap();
            }
        }));
    }

    let rx = ring.clone();
    let reader = std::thread::spawn(move || {
        let mut dev = rx.device("r").unwrap();
        let mut got = Vec::with_capacity(WRITERS * RECORDS * RECORD_LEN);
        let mut chunk = [0u8; 512];
        loop {
            let n = dev.read(&mut chunk).unwrap();
            if n > 0 {
                got.extend_from_slice(&chunk[..n]);
            } else if dev.eof() {
                break;
            } else {
                std::thread::yield_now();
            }
        }
        got
    });

    for w in writers {
        w.join().unwrap();
    }
    ring.shutdown(Shutdown::WRITE);
    let got = reader.join().unwrap();

    assert_eq!(got.len(), WRITERS * RECORDS * RECORD_LEN);
    let mut counts = [0usize; WRITERS];
    for record in got.chunks_exact(RECORD_LEN) {
        let id = record[0] as usize;
        let body = record[1];
        assert!(id < WRITERS, "corrupt record id");
        assert!(
            record[2..].iter().all(|&b| b == (id as u8) ^ body),
            "torn record"
        );
        counts[id] += 1;
    }
    assert_eq!(counts, [RECORDS; WRITERS]);
}

#[test]
fn seek_to_start_replays_stream() {
    let src = str_source("deterministic").unwrap();
    let mut dev = src;
    let first = read_all(&mut dev);
    dev.seek(SeekPos::Start(0)).unwrap();
    let second = read_all(&mut dev);
    assert_eq!(first, second);
}
