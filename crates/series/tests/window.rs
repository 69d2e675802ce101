#![forbid(unsafe_code)]

use serde_json::{json, Value};
use vigil_series::{SeriesError, StreamConfig, WindowStore, WindowTarget};

fn store_with(key: &str, window: Option<usize>) -> WindowStore {
    let mut s = WindowStore::new();
    s.register_stream(key, StreamConfig { window, ..Default::default() }).unwrap();
    s
}

fn series(s: &WindowStore, key: &str) -> Vec<Vec<Value>> {
    s.points(key).unwrap().iter().map(|p| p.series().to_vec()).collect()
}

#[test]
fn window_two_archives_then_restores() {
    let mut s = store_with("pnl", Some(2));
    for item in ["a", "b", "c"] {
        s.update("pnl", vec![json!({"book": "macro", "series": [item]})]).unwrap();
    }
    assert_eq!(series(&s, "pnl"), vec![vec![json!("b"), json!("c")]]);
    let archive = s.archive("pnl").unwrap();
    assert_eq!(archive.len(), 1);
    assert_eq!(archive[0].items, vec![json!("a")]);
    assert_eq!(archive[0].point_index, 0);

    s.set_window(WindowTarget::Stream("pnl".into()), None).unwrap();
    assert_eq!(series(&s, "pnl"), vec![vec![json!("a"), json!("b"), json!("c")]]);
    assert_eq!(s.archived_len("pnl"), 0);
}

#[test]
fn active_plus_archived_accounts_for_every_point() {
    let w = 5;
    let n = 23;
    let mut s = store_with("px", Some(w));
    for i in 0..n {
        s.update("px", vec![json!({"sym": "ES", "series": [i]})]).unwrap();
    }
    assert_eq!(series(&s, "px")[0].len(), w);
    assert_eq!(s.archived_len("px"), n - w);
    let archived: Vec<Value> = s.archive("px").unwrap().iter().flat_map(|e| e.items.clone()).collect();
    let expected: Vec<Value> = (0..n - w).map(|i| json!(i)).collect();
    assert_eq!(archived, expected, "archive keeps original order");

    s.set_window(WindowTarget::Stream("px".into()), None).unwrap();
    let all = series(&s, "px");
    let restored = &all[0];
    assert_eq!(restored.len(), n);
    assert_eq!(restored, &(0..n).map(|i| json!(i)).collect::<Vec<_>>());
    assert_eq!(s.archived_len("px"), 0);
}

#[test]
fn re_enabling_trims_the_restored_series() {
    let mut s = store_with("px", Some(2));
    for i in 0..4 {
        s.update("px", vec![json!({"sym": "NQ", "series": [i]})]).unwrap();
    }
    s.set_window(WindowTarget::Stream("px".into()), None).unwrap();
    s.set_window(WindowTarget::Stream("px".into()), Some(3)).unwrap();
    assert_eq!(series(&s, "px"), vec![vec![json!(1), json!(2), json!(3)]]);
    assert_eq!(s.archived_len("px"), 1);
}

#[test]
fn points_merge_by_meta_key() {
    let mut s = store_with("fills", None);
    let report = s
        .update(
            "fills",
            vec![
                json!({"sym": "CL", "venue": "nymex", "seq": 1, "series": [1], "marks": ["x"]}),
                json!({"sym": "CL", "venue": "ice", "seq": 2, "series": [2]}),
                json!({"venue": "nymex", "sym": "CL", "seq": 3, "series": [3], "marks": ["y"]}),
                json!(17),
            ],
        )
        .unwrap();
    assert_eq!((report.created, report.merged, report.skipped), (2, 1, 1));
    let points = s.points("fills").unwrap();
    assert_eq!(points[0].series(), [json!(1), json!(3)].as_slice());
    assert_eq!(points[0].fields()["marks"], json!(["x", "y"]));
    // Reserved fields are not part of the key; the first point keeps its own.
    assert_eq!(points[0].fields()["seq"], json!(1));
    assert_eq!(points[1].series(), [json!(2)].as_slice());
}

#[test]
fn restore_goes_back_to_the_right_point() {
    let mut s = store_with("q", Some(1));
    s.update("q", vec![json!({"k": "a", "series": [1, 2]}), json!({"k": "b", "series": [10, 20, 30]})]).unwrap();
    s.update("q", vec![json!({"k": "a", "series": [3]})]).unwrap();
    assert_eq!(series(&s, "q"), vec![vec![json!(3)], vec![json!(30)]]);
    s.set_window(WindowTarget::Stream("q".into()), None).unwrap();
    assert_eq!(series(&s, "q"), vec![vec![json!(1), json!(2), json!(3)], vec![json!(10), json!(20), json!(30)]]);
}

#[test]
fn global_window_applies_to_inheriting_streams() {
    let mut s = WindowStore::with_window(Some(3));
    s.register_stream("a", StreamConfig::default()).unwrap();
    s.register_stream("b", StreamConfig { window: Some(1), ..Default::default() }).unwrap();
    for i in 0..4 {
        s.update("a", vec![json!({"k": 1, "series": [i]})]).unwrap();
        s.update("b", vec![json!({"k": 1, "series": [i]})]).unwrap();
    }
    assert_eq!(s.window("a"), Some(3));
    assert_eq!(series(&s, "a")[0].len(), 3);
    assert_eq!(series(&s, "b")[0].len(), 1);

    s.set_window(WindowTarget::Global, None).unwrap();
    assert_eq!(series(&s, "a")[0].len(), 4);
    assert_eq!(series(&s, "b")[0].len(), 4);
    assert_eq!(s.window("b"), None);
}

#[test]
fn unknown_and_duplicate_streams_are_errors() {
    let mut s = store_with("a", None);
    assert_eq!(s.update("zz", vec![]).unwrap_err(), SeriesError::UnknownStream("zz".into()));
    assert_eq!(s.register_stream("a", StreamConfig::default()).unwrap_err(), SeriesError::AlreadyRegistered("a".into()));
    assert!(s.unregister_stream("a"));
    assert!(s.points("a").is_none());
    assert_eq!(s.archived_len("a"), 0);
}

#[test]
fn custom_series_field() {
    let mut s = WindowStore::new();
    s.register_stream("depth", StreamConfig { series_field: "ticks".into(), window: Some(2), ..Default::default() }).unwrap();
    s.update("depth", vec![json!({"lvl": 1, "ticks": [1, 2, 3]})]).unwrap();
    let p = &s.points("depth").unwrap()[0];
    assert_eq!(p.series(), [json!(2), json!(3)].as_slice());
    assert_eq!(p.clone().into_value(), json!({"lvl": 1, "ticks": [2, 3]}));
}

#[test]
fn zero_window_at_registration_means_no_window() {
    let mut registered = store_with("a", Some(0));
    registered.update("a", vec![json!({"k": 1, "series": [1, 2, 3]})]).unwrap();
    assert_eq!(series(&registered, "a"), vec![vec![json!(1), json!(2), json!(3)]]);
    assert_eq!(registered.archived_len("a"), 0);
    assert_eq!(registered.window("a"), None);

    let mut switched = store_with("a", None);
    switched.set_window(WindowTarget::Stream("a".into()), Some(0)).unwrap();
    switched.update("a", vec![json!({"k": 1, "series": [1, 2, 3]})]).unwrap();
    assert_eq!(series(&switched, "a"), series(&registered, "a"));
    assert_eq!(switched.window("a"), registered.window("a"));
}
