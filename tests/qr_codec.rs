use smart_health_core::qr;

// Scenario B (spec §8): "-Aaz09" -> "002052770312".
#[test]
fn scenario_b_qr_numeric_exact_values() {
    assert_eq!(qr::encode_numeric("-Aaz09").unwrap(), "002052770312");
    assert_eq!(qr::decode_numeric("002052770312").unwrap(), "-Aaz09");
}

// Scenario C (spec §8): 125 identical chars at maxSingleQRSize=50 chunk into
// [42,42,41] characters, i.e. [84,84,82] numeric digits, framed as shc:/n/N/.
#[test]
fn scenario_c_balanced_chunking_of_125_char_jws() {
    let jws = "A".repeat(125);

    let chunks = qr::chunk(
        &jws,
        qr::ChunkOptions {
            enable_chunking: true,
            max_single_qr_size: 50,
        },
    )
    .unwrap();
    assert_eq!(chunks.len(), 3);
    let sizes: Vec<usize> = chunks.iter().map(|c| c.body.len()).collect();
    assert_eq!(sizes, vec![84, 84, 82]);

    assert_eq!(chunks[0].to_uri(), format!("shc:/1/3/{}", chunks[0].body));
    assert_eq!(chunks[1].to_uri(), format!("shc:/2/3/{}", chunks[1].body));
    assert_eq!(chunks[2].to_uri(), format!("shc:/3/3/{}", chunks[2].body));

    let uris: Vec<String> = chunks.iter().map(|c| c.to_uri()).collect();
    assert_eq!(qr::reassemble(&uris).unwrap(), jws);
}

// Scenario C continued: with enableChunking=false the same 125-char JWS is
// never split, regardless of exceeding maxSingleQRSize.
#[test]
fn scenario_c_enable_chunking_false_yields_single_chunk() {
    let jws = "A".repeat(125);
    let chunks = qr::chunk(
        &jws,
        qr::ChunkOptions {
            enable_chunking: false,
            max_single_qr_size: 50,
        },
    )
    .unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].total, 1);
    assert_eq!(qr::decode_numeric(&chunks[0].body).unwrap(), jws);
}

#[test]
fn scan_rejects_inconsistent_totals() {
    let result = qr::reassemble(&["shc:/1/2/01".to_string(), "shc:/2/3/02".to_string()]);
    assert!(result.is_err());
}

#[test]
fn scan_rejects_index_out_of_range() {
    let result = qr::parse_chunk_uri("shc:/5/3/01");
    assert!(result.is_err());
}
