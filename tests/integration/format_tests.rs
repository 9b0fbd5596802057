//! Format adapter integration tests.
//!
//! Tests verify:
//! - Header parsing and tier reconstruction for every source format
//! - Tile addressing: every valid tile resolves, invalid ones are rejected
//! - Incremental lookup tables for packed formats
//! - Split JPEG headers reassembled into decodable tiles
//! - Malformed headers and missing transports

use pyramid_viewer::format::zif::TableSource;
use pyramid_viewer::io::{ByteRange, NetConnector};
use pyramid_viewer::pyramid::{halving_method, PyramidDescriptor};
use pyramid_viewer::tile::{decode_tile, TileId};
use pyramid_viewer::{
    FetchDescriptor, FormatAdapter, FormatError, FormatOptions, PackedError, SourceFormat,
    TileError,
};

use super::test_utils::{
    all_tiles, dzi_xml, folder_source, server_json, tier_color, MockConnector, PffBuilder,
    ZifBuilder,
};

async fn open(
    connector: &MockConnector,
    path: &str,
) -> Result<(FormatAdapter, PyramidDescriptor), FormatError> {
    let mut adapter = FormatAdapter::new(path, None);
    let desc = adapter
        .parse_header(connector, &FormatOptions::default())
        .await?;
    Ok((adapter, desc))
}

/// Fetch every chunk a packed tile is waiting on, then resolve it again.
async fn resolve_fully(
    connector: &MockConnector,
    adapter: &FormatAdapter,
    desc: &mut PyramidDescriptor,
    id: TileId,
) -> FetchDescriptor {
    for _ in 0..3 {
        match adapter.resolve_tile(desc, id).unwrap() {
            FetchDescriptor::Pending(requests) => {
                for request in requests {
                    let bytes = connector
                        .load_bytes(adapter.data_path(), request.range)
                        .await
                        .unwrap();
                    desc.chunks.install(request.key, bytes);
                }
            }
            resolved => return resolved,
        }
    }
    panic!("tile {} still pending after its chunks arrived", id);
}

fn assert_solid(data: &[u8], id: TileId, width: u32, height: u32) {
    let image = decode_tile(&id.name(), data).unwrap();
    assert_eq!((image.width(), image.height()), (width, height));
    assert_eq!(image.pixels().get_pixel(0, 0).0, tier_color(id.tier));
}

// =============================================================================
// Source Detection
// =============================================================================

#[test]
fn test_format_detected_from_path() {
    let cases = [
        ("images/slide.zif", SourceFormat::Zif),
        ("images/slide.PFF", SourceFormat::Pff),
        ("images/slide/ImageProperties.xml", SourceFormat::TileFolder),
        ("images/slide", SourceFormat::TileFolder),
        ("https://host/dz/slide.dzi?v=2", SourceFormat::DeepZoom),
        ("http://localhost:3000/slides/sample.svs", SourceFormat::ImageServer),
    ];
    for (path, expected) in cases {
        assert_eq!(FormatAdapter::new(path, None).format(), expected, "{}", path);
    }
    // An explicit format wins over the path
    assert_eq!(
        FormatAdapter::new("images/slide.bin", Some(SourceFormat::Zif)).format(),
        SourceFormat::Zif
    );
}

// =============================================================================
// Tile Folders
// =============================================================================

#[tokio::test]
async fn test_folder_4000x3000_tiers() {
    let xml = r#"<IMAGE_PROPERTIES WIDTH="4000" HEIGHT="3000" NUMTILES="257" NUMIMAGES="1" VERSION="1.8" TILESIZE="256" />"#;
    let connector = MockConnector::new().with_blob("img/ImageProperties.xml", xml);
    let (adapter, desc) = open(&connector, "img/ImageProperties.xml").await.unwrap();

    assert_eq!(desc.tier_widths(), vec![250, 500, 1000, 2000, 4000]);
    assert_eq!(desc.tier_heights(), vec![187, 375, 750, 1500, 3000]);
    assert_eq!(desc.tier_tile_counts(), vec![1, 4, 12, 48, 192]);
    assert_eq!(desc.total_tile_count(), 257);

    // The 257th tile spills into the second tile group
    match adapter.resolve_tile(&desc, TileId::new(4, 15, 11)).unwrap() {
        FetchDescriptor::Url(url) => assert_eq!(url, "img/TileGroup1/4-15-11.jpg"),
        other => panic!("unexpected {:?}", other),
    }
    match adapter.resolve_tile(&desc, TileId::new(4, 14, 11)).unwrap() {
        FetchDescriptor::Url(url) => assert_eq!(url, "img/TileGroup0/4-14-11.jpg"),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(connector.resource_requests(), vec!["img/ImageProperties.xml"]);
}

#[tokio::test]
async fn test_folder_tile_decodes() {
    let connector = MockConnector::new().with_blobs(folder_source("img", 1000, 800, 256));
    let (adapter, desc) = open(&connector, "img").await.unwrap();
    assert_eq!(desc.tier_count(), 3);

    let id = TileId::new(2, 3, 3);
    let FetchDescriptor::Url(url) = adapter.resolve_tile(&desc, id).unwrap() else {
        panic!("folder tiles resolve to URLs");
    };
    let image = connector.load_image(&url).await.unwrap();
    // Right and bottom edge tile of a 1000x800 tier
    assert_eq!((image.width(), image.height()), (232, 32));
    assert_eq!(image.pixels().get_pixel(0, 0).0, tier_color(2));
}

#[tokio::test]
async fn test_folder_declared_count_mismatch() {
    let xml = r#"<IMAGE_PROPERTIES WIDTH="4000" HEIGHT="3000" NUMTILES="300" TILESIZE="256" />"#;
    let connector = MockConnector::new().with_blob("img/ImageProperties.xml", xml);
    let err = open(&connector, "img/ImageProperties.xml").await.unwrap_err();
    assert!(matches!(err, FormatError::TileCountMismatch { declared: 300, .. }));
}

#[tokio::test]
async fn test_folder_missing_properties() {
    let connector = MockConnector::new();
    let err = open(&connector, "img/ImageProperties.xml").await.unwrap_err();
    assert!(matches!(err, FormatError::Io(_)));
}

// =============================================================================
// ZIF
// =============================================================================

#[tokio::test]
async fn test_zif_single_tile_inline_tables() {
    let data = ZifBuilder::new(200, 100, 256).build();
    let connector = MockConnector::new().with_blob("one.zif", data.clone());
    let (adapter, desc) = open(&connector, "one.zif").await.unwrap();

    assert_eq!(desc.tier_count(), 1);
    assert_eq!((desc.image_width(), desc.image_height()), (200, 100));
    let FormatAdapter::PackedA(zif) = &adapter else {
        panic!("expected a ZIF adapter");
    };
    assert!(matches!(zif.tier_tables()[0].offsets, TableSource::Inline(_)));
    assert!(matches!(zif.tier_tables()[0].byte_counts, TableSource::Inline(_)));

    // Resolves straight to a range, no table chunk needed
    let requests_before = connector.request_count();
    let id = TileId::new(0, 0, 0);
    let FetchDescriptor::Range { range, headers, .. } = adapter.resolve_tile(&desc, id).unwrap()
    else {
        panic!("expected a byte range");
    };
    assert!(headers.is_none());
    assert_eq!(connector.request_count(), requests_before);
    assert_solid(&data[range.start as usize..range.end as usize], id, 200, 100);
}

#[tokio::test]
async fn test_zif_tiers_are_thumbnail_first() {
    let builder = ZifBuilder::new(1000, 800, 256);
    let connector = MockConnector::new().with_blob("img.zif", builder.build());
    let (adapter, desc) = open(&connector, "img.zif").await.unwrap();

    assert_eq!(desc.tier_widths(), vec![250, 500, 1000]);
    assert_eq!(desc.tier_tile_counts(), vec![1, 4, 16]);

    let FormatAdapter::PackedA(zif) = &adapter else {
        panic!("expected a ZIF adapter");
    };
    let tables = zif.tier_tables();
    assert!(matches!(tables[0].offsets, TableSource::Inline(_)));
    match &tables[2].offsets {
        TableSource::Chunked(table) => {
            assert_eq!(table.tier, 2);
            assert_eq!(table.records, 16);
            assert_eq!(table.record_size, 8);
        }
        other => panic!("unexpected {:?}", other),
    }
    match &tables[2].byte_counts {
        TableSource::Chunked(table) => assert_eq!(table.record_size, 4),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_zif_tables_load_on_demand() {
    let builder = ZifBuilder::new(1000, 800, 256);
    let data = builder.build();
    let connector = MockConnector::new().with_blob("img.zif", data.clone());
    let (adapter, mut desc) = open(&connector, "img.zif").await.unwrap();

    let id = TileId::new(2, 1, 2);
    match adapter.resolve_tile(&desc, id).unwrap() {
        FetchDescriptor::Pending(requests) => assert_eq!(requests.len(), 2),
        other => panic!("unexpected {:?}", other),
    }

    let FetchDescriptor::Range { range, .. } =
        resolve_fully(&connector, &adapter, &mut desc, id).await
    else {
        panic!("expected a byte range");
    };
    assert_solid(&data[range.start as usize..range.end as usize], id, 256, 256);

    // Same chunk, no more requests
    let before = connector.request_count();
    assert!(matches!(
        adapter.resolve_tile(&desc, TileId::new(2, 3, 3)).unwrap(),
        FetchDescriptor::Range { .. }
    ));
    assert_eq!(connector.request_count(), before);
}

#[tokio::test]
async fn test_zif_sparse_tile_skips() {
    let sparse = TileId::new(1, 1, 0);
    let data = ZifBuilder::new(1000, 800, 256).sparse(sparse).build();
    let connector = MockConnector::new().with_blob("img.zif", data);
    let (adapter, mut desc) = open(&connector, "img.zif").await.unwrap();

    assert!(matches!(
        resolve_fully(&connector, &adapter, &mut desc, sparse).await,
        FetchDescriptor::Skip
    ));
    assert!(matches!(
        resolve_fully(&connector, &adapter, &mut desc, TileId::new(1, 0, 0)).await,
        FetchDescriptor::Range { .. }
    ));
}

#[tokio::test]
async fn test_zif_header_outside_prefix() {
    // IFDs sit after the tile data, far beyond a 16-byte prefix
    let data = ZifBuilder::new(1000, 800, 256).build();
    let connector = MockConnector::new().with_blob("img.zif", data);
    let mut adapter = FormatAdapter::new("img.zif", None);
    let options = FormatOptions {
        zif_header_bytes: 16,
        ..FormatOptions::default()
    };
    let desc = adapter.parse_header(&connector, &options).await.unwrap();
    assert_eq!(desc.tier_count(), 3);
    assert!(connector.range_requests().len() > 1);
}

#[tokio::test]
async fn test_zif_bad_magic() {
    let mut data = ZifBuilder::new(200, 100, 256).build();
    data[2] = 0x2A;
    let connector = MockConnector::new().with_blob("bad.zif", data);
    let err = open(&connector, "bad.zif").await.unwrap_err();
    assert!(matches!(err, FormatError::Packed(PackedError::InvalidMagic { .. })));
}

#[tokio::test]
async fn test_zif_next_ifd_past_address_space() {
    let mut data = ZifBuilder::new(200, 100, 256).build();
    let len = data.len();
    data[len - 8..].copy_from_slice(&(u64::MAX - 2).to_le_bytes());
    let connector = MockConnector::new().with_blob("bad.zif", data);
    let err = open(&connector, "bad.zif").await.unwrap_err();
    assert!(matches!(
        err,
        FormatError::Packed(PackedError::InvalidIfdOffset(offset)) if offset == u64::MAX - 2
    ));
}

#[tokio::test]
async fn test_zif_tile_offset_past_address_space_fails_tile() {
    let mut data = ZifBuilder::new(200, 100, 256).build();
    // Single tile: the TileOffsets entry stores the offset inline
    let entry = data
        .windows(4)
        .rposition(|w| w == [0x44, 0x01, 16, 0])
        .unwrap();
    data[entry + 12..entry + 20].copy_from_slice(&(u64::MAX - 5).to_le_bytes());
    let connector = MockConnector::new().with_blob("bad.zif", data);
    let (adapter, desc) = open(&connector, "bad.zif").await.unwrap();

    let err = adapter.resolve_tile(&desc, TileId::new(0, 0, 0)).unwrap_err();
    assert!(matches!(err, TileError::InvalidLocation { .. }), "{:?}", err);
}

#[tokio::test]
async fn test_pff_record_past_address_space_fails_tile() {
    let builder = PffBuilder::new(200, 100, 256);
    let mut data = builder.build();
    let at = builder.index_start() as usize;
    data[at..at + 8].copy_from_slice(&(u64::MAX - 5).to_be_bytes());
    let connector = MockConnector::new().with_blob("bad.pff", data);
    let (adapter, mut desc) = open(&connector, "bad.pff").await.unwrap();

    let id = TileId::new(0, 0, 0);
    let FetchDescriptor::Pending(requests) = adapter.resolve_tile(&desc, id).unwrap() else {
        panic!("index chunk should be pending");
    };
    for request in requests {
        let bytes = connector
            .load_bytes(adapter.data_path(), request.range)
            .await
            .unwrap();
        desc.chunks.install(request.key, bytes);
    }
    let err = adapter.resolve_tile(&desc, id).unwrap_err();
    assert!(matches!(err, TileError::InvalidLocation { .. }), "{:?}", err);
}

#[tokio::test]
async fn test_packed_formats_need_byte_ranges() {
    for path in ["img.zif", "img.pff"] {
        let connector = MockConnector::new()
            .with_blob(path, ZifBuilder::new(200, 100, 256).build())
            .without_byte_ranges();
        let err = open(&connector, path).await.unwrap_err();
        assert!(matches!(err, FormatError::Environment(_)), "{}", path);
        assert_eq!(connector.request_count(), 0);
    }
}

// =============================================================================
// PFF
// =============================================================================

#[tokio::test]
async fn test_pff_parse() {
    let builder = PffBuilder::new(1000, 800, 256);
    let connector = MockConnector::new().with_blob("img.pff", builder.build());
    let (adapter, desc) = open(&connector, "img.pff").await.unwrap();

    assert_eq!(desc.tier_widths(), vec![250, 500, 1000]);
    assert_eq!(desc.total_tile_count(), 21);

    let FormatAdapter::PackedB(pff) = &adapter else {
        panic!("expected a PFF adapter");
    };
    let index = pff.index_table().unwrap();
    assert_eq!(index.start, builder.index_start());
    assert_eq!(index.records, 21);
    assert!(pff.jpeg_headers().is_none());
}

#[tokio::test]
async fn test_pff_split_headers_reassembled() {
    let builder = PffBuilder::new(1000, 800, 256).split_headers();
    let connector = MockConnector::new().with_blob("img.pff", builder.build());
    let (adapter, mut desc) = open(&connector, "img.pff").await.unwrap();

    let FormatAdapter::PackedB(pff) = &adapter else {
        panic!("expected a PFF adapter");
    };
    assert_eq!(pff.jpeg_headers().map(|h| h.len()), Some(2));

    for (id, w, h) in [(TileId::new(0, 0, 0), 250, 200), (TileId::new(2, 3, 3), 232, 32)] {
        let FetchDescriptor::Range { path, range, headers } =
            resolve_fully(&connector, &adapter, &mut desc, id).await
        else {
            panic!("expected a byte range");
        };
        let body = connector.load_bytes(&path, range).await.unwrap();
        let table = headers.expect("header table travels with the fetch");
        let data = table.assemble(&id.name(), &body).unwrap();
        assert_solid(&data, id, w, h);
    }
}

#[tokio::test]
async fn test_pff_sparse_tile_skips() {
    let sparse = TileId::new(2, 0, 0);
    let data = PffBuilder::new(1000, 800, 256).sparse(sparse).build();
    let connector = MockConnector::new().with_blob("img.pff", data);
    let (adapter, mut desc) = open(&connector, "img.pff").await.unwrap();
    assert!(matches!(
        resolve_fully(&connector, &adapter, &mut desc, sparse).await,
        FetchDescriptor::Skip
    ));
}

#[tokio::test]
async fn test_pff_unsupported_version() {
    let mut data = PffBuilder::new(1000, 800, 256).build();
    data[8..12].copy_from_slice(&7u32.to_be_bytes());
    let connector = MockConnector::new().with_blob("img.pff", data);
    let err = open(&connector, "img.pff").await.unwrap_err();
    assert!(matches!(err, FormatError::Packed(PackedError::UnsupportedVersion(7))));
}

// =============================================================================
// Deep Zoom and Tile Servers
// =============================================================================

#[tokio::test]
async fn test_deep_zoom_levels_and_overlap() {
    let connector =
        MockConnector::new().with_blob("dz/image.dzi", dzi_xml(1000, 800, 256, 1, "png"));
    let (adapter, desc) = open(&connector, "dz/image.dzi").await.unwrap();

    // Levels 0..=7 are smaller than a tile and left out
    assert_eq!(desc.tier_widths(), vec![250, 500, 1000]);
    let FormatAdapter::DeepZoom(dz) = &adapter else {
        panic!("expected a deep zoom adapter");
    };
    assert_eq!(dz.skip(), 8);

    match adapter.resolve_tile(&desc, TileId::new(2, 1, 0)).unwrap() {
        FetchDescriptor::Url(url) => assert_eq!(url, "dz/image_files/10/1_0.png"),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(adapter.tile_origin(&desc, TileId::new(2, 0, 0)), (0, 0));
    assert_eq!(adapter.tile_origin(&desc, TileId::new(2, 1, 2)), (255, 511));
}

#[tokio::test]
async fn test_image_server_levels_reversed() {
    let url = "http://localhost:3000/slides/sample.svs";
    let connector = MockConnector::new().with_blob(url, server_json("sample.svs", 1000, 800, 256));
    let (adapter, desc) = open(&connector, url).await.unwrap();

    assert_eq!(desc.tier_widths(), vec![250, 500, 1000]);
    match adapter.resolve_tile(&desc, TileId::new(2, 3, 1)).unwrap() {
        FetchDescriptor::Url(url) => {
            assert_eq!(url, "http://localhost:3000/tiles/sample.svs/0/3/1.jpg")
        }
        other => panic!("unexpected {:?}", other),
    }
    match adapter.resolve_tile(&desc, TileId::new(0, 0, 0)).unwrap() {
        FetchDescriptor::Url(url) => {
            assert_eq!(url, "http://localhost:3000/tiles/sample.svs/2/0/0.jpg")
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_image_server_bad_metadata() {
    let url = "http://localhost:3000/slides/sample.svs";
    let connector = MockConnector::new().with_blob(url, "{\"slide_id\": 1}");
    let err = open(&connector, url).await.unwrap_err();
    assert!(matches!(err, FormatError::Properties(_)));
}

// =============================================================================
// Tile Addressing
// =============================================================================

#[tokio::test]
async fn test_every_valid_tile_resolves() {
    let (w, h, ts) = (1000, 800, 256);
    let server = "http://host/slides/s1";
    let connector = MockConnector::new()
        .with_blobs(folder_source("folder", w, h, ts))
        .with_blob("img.zif", ZifBuilder::new(w, h, ts).build())
        .with_blob("img.pff", PffBuilder::new(w, h, ts).split_headers().build())
        .with_blob("dz/img.dzi", dzi_xml(w, h, ts, 0, "jpg"))
        .with_blob(server, server_json("s1", w, h, ts));

    let tiles = all_tiles(&halving_method(w, h, ts, ts), ts);
    for path in ["folder", "img.zif", "img.pff", "dz/img.dzi", server] {
        let (adapter, mut desc) = open(&connector, path).await.unwrap();
        for (id, _, _) in &tiles {
            let fetch = resolve_fully(&connector, &adapter, &mut desc, *id).await;
            assert!(
                matches!(fetch, FetchDescriptor::Url(_) | FetchDescriptor::Range { .. }),
                "{} {}",
                path,
                id
            );
        }

        let max = desc.max_tier();
        let cols = desc.tier(max).unwrap().tiles_x;
        for bad in [TileId::new(max + 1, 0, 0), TileId::new(max, cols, 0)] {
            assert!(matches!(
                adapter.resolve_tile(&desc, bad),
                Err(TileError::OutOfBounds { .. })
            ));
        }
    }
}

#[tokio::test]
async fn test_range_out_of_bounds_reported() {
    let connector = MockConnector::new().with_blob("small.bin", vec![0u8; 10]);
    let err = connector
        .load_bytes("small.bin", ByteRange::new(5, 10))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        pyramid_viewer::IoError::RangeOutOfBounds { size: 10, .. }
    ));
}
