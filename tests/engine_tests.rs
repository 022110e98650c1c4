//! End-to-end engine tests.
//!
//! Each test writes a miniature TPC-H database in the engine's binary
//! column format (fixed-width arrays + slotted string pages) into a temp
//! directory, builds a plan, runs it through the full lower → JIT →
//! schedule path and checks the collected rows.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use morsel::expr::Exp;
use morsel::iu::IuSet;
use morsel::ops::{
    Aggregate, Aggregation, CollectSink, Datum, InnerJoin, Map, Operator, Scan, Selection, Sort,
};
use morsel::runtime::date::to_julian;
use morsel::types::TypeKind;
use morsel::{produce_with, Config, SchedulerKind};
use morsel::storage::Database;

// ============================================================================
// Binary column writers
// ============================================================================

fn write_i32(dir: &Path, name: &str, vals: &[i32]) {
    let bytes: Vec<u8> = vals.iter().flat_map(|v| v.to_le_bytes()).collect();
    fs::write(dir.join(format!("{name}.bin")), bytes).unwrap();
}

fn write_i64(dir: &Path, name: &str, vals: &[i64]) {
    let bytes: Vec<u8> = vals.iter().flat_map(|v| v.to_le_bytes()).collect();
    fs::write(dir.join(format!("{name}.bin")), bytes).unwrap();
}

fn write_f64(dir: &Path, name: &str, vals: &[f64]) {
    let bytes: Vec<u8> = vals.iter().flat_map(|v| v.to_le_bytes()).collect();
    fs::write(dir.join(format!("{name}.bin")), bytes).unwrap();
}

fn write_u8(dir: &Path, name: &str, vals: &[u8]) {
    fs::write(dir.join(format!("{name}.bin")), vals).unwrap();
}

fn write_date(dir: &Path, name: &str, vals: &[u32]) {
    let bytes: Vec<u8> = vals.iter().flat_map(|v| v.to_le_bytes()).collect();
    fs::write(dir.join(format!("{name}.bin")), bytes).unwrap();
}

/// Slotted page: count, then `{len, offset}` slots, then the raw bytes;
/// offsets are relative to the file base.
fn write_str(dir: &Path, name: &str, vals: &[&str]) {
    let header = 8 + 16 * vals.len();
    let mut slots = Vec::new();
    let mut blob = Vec::new();
    for v in vals {
        slots.extend_from_slice(&(v.len() as u64).to_le_bytes());
        slots.extend_from_slice(&((header + blob.len()) as u64).to_le_bytes());
        blob.extend_from_slice(v.as_bytes());
    }
    let mut file = (vals.len() as u64).to_le_bytes().to_vec();
    file.extend_from_slice(&slots);
    file.extend_from_slice(&blob);
    fs::write(dir.join(format!("{name}.bin")), file).unwrap();
}

// ============================================================================
// The miniature dataset
// ============================================================================

const L_ORDERKEY: [i64; 8] = [10, 10, 11, 12, 13, 14, 15, 15];
const L_SUPPKEY: [i32; 8] = [1, 2, 2, 1, 2, 3, 1, 2];
const L_LINENUMBER: [i32; 8] = [1, 2, 1, 1, 1, 1, 1, 2];
const L_EXTENDEDPRICE: [f64; 8] = [1000.0, 2000.0, 1500.0, 500.0, 800.0, 700.0, 900.0, 1100.0];
const L_DISCOUNT: [f64; 8] = [0.1, 0.5, 0.2, 0.05, 0.0, 0.1, 0.0, 0.25];
const L_RETURNFLAG: [u8; 8] = [b'N', b'A', b'R', b'N', b'A', b'N', b'R', b'N'];
const L_LINESTATUS: [u8; 8] = [b'F', b'F', b'F', b'O', b'F', b'O', b'F', b'O'];

const O_ORDERKEY: [i64; 6] = [10, 11, 12, 13, 14, 15];
const O_CUSTKEY: [i32; 6] = [1, 2, 3, 4, 1, 2];

const P_SIZE: [i32; 3] = [5, 0, 20];
const P_NAME: [&str; 3] = ["green metal box", "red shiny ball", "blue rubber duck"];

fn write_mini_db(root: &Path) {
    let dir = |table: &str| {
        let d = root.join(table);
        fs::create_dir_all(&d).unwrap();
        d
    };

    let d = dir("region");
    write_i32(&d, "r_regionkey", &[0, 1, 2, 3, 4]);
    write_str(
        &d,
        "r_name",
        &["AFRICA", "AMERICA", "ASIA", "EUROPE", "MIDDLE EAST"],
    );
    write_str(&d, "r_comment", &["a", "b", "c", "d", "e"]);

    let d = dir("nation");
    write_i32(&d, "n_nationkey", &[0, 1, 2, 3]);
    write_str(&d, "n_name", &["CHINA", "INDIA", "FRANCE", "BRAZIL"]);
    write_i32(&d, "n_regionkey", &[2, 2, 3, 1]);
    write_str(&d, "n_comment", &["", "", "", ""]);

    let d = dir("supplier");
    write_i32(&d, "s_suppkey", &[1, 2, 3]);
    write_str(&d, "s_name", &["Supplier#1", "Supplier#2", "Supplier#3"]);
    write_str(&d, "s_address", &["addr1", "addr2", "addr3"]);
    write_i32(&d, "s_nationkey", &[0, 1, 0]);
    write_str(&d, "s_phone", &["11-111", "22-222", "33-333"]);
    write_f64(&d, "s_acctbal", &[100.0, 200.0, 300.0]);
    write_str(&d, "s_comment", &["", "", ""]);

    let d = dir("customer");
    write_i32(&d, "c_custkey", &[1, 2, 3, 4]);
    write_str(&d, "c_name", &["Cust#1", "Cust#2", "Cust#3", "Cust#4"]);
    write_str(&d, "c_address", &["ca1", "ca2", "ca3", "ca4"]);
    write_i32(&d, "c_nationkey", &[0, 1, 2, 3]);
    write_str(&d, "c_phone", &["1", "2", "3", "4"]);
    write_f64(&d, "c_acctbal", &[10.0, 20.0, 30.0, 40.0]);
    write_str(&d, "c_mktsegment", &["BUILDING", "MACHINERY", "BUILDING", "HOUSEHOLD"]);
    write_str(&d, "c_comment", &["", "", "", ""]);

    let d = dir("orders");
    write_i64(&d, "o_orderkey", &O_ORDERKEY);
    write_i32(&d, "o_custkey", &O_CUSTKEY);
    write_u8(&d, "o_orderstatus", &[b'O', b'F', b'O', b'F', b'O', b'F']);
    write_f64(&d, "o_totalprice", &[3000.0, 1500.0, 500.0, 800.0, 700.0, 2000.0]);
    write_date(
        &d,
        "o_orderdate",
        &[
            to_julian(1994, 1, 15),
            to_julian(1994, 3, 1),
            to_julian(1994, 6, 30),
            to_julian(1994, 11, 2),
            to_julian(1995, 2, 10),
            to_julian(1995, 7, 4),
        ],
    );
    write_str(&d, "o_orderpriority", &["1-URGENT"; 6]);
    write_str(&d, "o_clerk", &["Clerk#1"; 6]);
    write_i32(&d, "o_shippriority", &[0; 6]);
    write_str(&d, "o_comment", &[""; 6]);

    let d = dir("lineitem");
    write_i64(&d, "l_orderkey", &L_ORDERKEY);
    write_i32(&d, "l_partkey", &[1, 2, 3, 1, 2, 3, 1, 2]);
    write_i32(&d, "l_suppkey", &L_SUPPKEY);
    write_i32(&d, "l_linenumber", &L_LINENUMBER);
    write_f64(&d, "l_quantity", &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    write_f64(&d, "l_extendedprice", &L_EXTENDEDPRICE);
    write_f64(&d, "l_discount", &L_DISCOUNT);
    write_f64(&d, "l_tax", &[0.0; 8]);
    write_u8(&d, "l_returnflag", &L_RETURNFLAG);
    write_u8(&d, "l_linestatus", &L_LINESTATUS);
    let ship = to_julian(1994, 2, 1);
    write_date(&d, "l_shipdate", &[ship; 8]);
    write_date(&d, "l_commitdate", &[ship; 8]);
    write_date(&d, "l_receiptdate", &[ship; 8]);
    write_str(&d, "l_shipinstruct", &["NONE"; 8]);
    write_str(&d, "l_shipmode", &["MAIL"; 8]);
    write_str(&d, "l_comment", &[""; 8]);

    let d = dir("part");
    write_i32(&d, "p_partkey", &[1, 2, 3]);
    write_str(&d, "p_name", &P_NAME);
    write_str(&d, "p_mfgr", &["M1", "M2", "M3"]);
    write_str(&d, "p_brand", &["B1", "B2", "B3"]);
    write_str(&d, "p_type", &["METAL", "SHINY", "RUBBER"]);
    write_i32(&d, "p_size", &P_SIZE);
    write_str(&d, "p_container", &["BOX", "BAG", "BOX"]);
    write_f64(&d, "p_retailprice", &[10.0, 20.0, 30.0]);
    write_str(&d, "p_comment", &["", "", ""]);

    let d = dir("partsupp");
    write_i32(&d, "ps_partkey", &[1, 2, 3]);
    write_i32(&d, "ps_suppkey", &[1, 2, 3]);
    write_i32(&d, "ps_availqty", &[100, 200, 300]);
    write_f64(&d, "ps_supplycost", &[1.0, 2.0, 3.0]);
    write_str(&d, "ps_comment", &["", "", ""]);
}

// ============================================================================
// Harness
// ============================================================================

struct Fixture {
    _tmp: TempDir,
    db: Database,
    config: Config,
}

fn fixture() -> Fixture {
    fixture_with(SchedulerKind::Multithreaded)
}

fn fixture_with(scheduler: SchedulerKind) -> Fixture {
    let tmp = TempDir::new().unwrap();
    write_mini_db(tmp.path());
    let db = Database::open(tmp.path()).unwrap();
    let config = Config {
        tpchpath: tmp.path().to_path_buf(),
        runs: 1,
        threads: 2,
        // tiny chunks so several workers touch every scan
        chunk_size: 3,
        scheduler,
    };
    Fixture {
        _tmp: tmp,
        db,
        config,
    }
}

fn collect(
    fixture: &Fixture,
    plan: &mut dyn Operator,
    outputs: &[morsel::Iu],
) -> Vec<Vec<Datum>> {
    let mut sink = CollectSink::new();
    let names: Vec<String> = outputs.iter().map(|iu| iu.name().to_string()).collect();
    produce_with(&fixture.config, &fixture.db, plan, outputs, &names, &mut sink).unwrap();
    sink.take_rows()
}

// ============================================================================
// Scans and selections
// ============================================================================

#[test]
fn full_region_scan() {
    let f = fixture();
    let scan = Scan::new("region").unwrap();
    let key = scan.iu("r_regionkey").unwrap();
    let name = scan.iu("r_name").unwrap();
    let mut plan = scan;

    let mut rows = collect(&f, &mut plan, &[key, name]);
    rows.sort_by_key(|r| r[0].as_i64());
    assert_eq!(rows.len(), 5);
    let names: Vec<&str> = rows.iter().map(|r| r[1].as_str()).collect();
    assert_eq!(names, ["AFRICA", "AMERICA", "ASIA", "EUROPE", "MIDDLE EAST"]);
}

#[test]
fn string_equality_selection() {
    let f = fixture();
    let scan = Scan::new("region").unwrap();
    let key = scan.iu("r_regionkey").unwrap();
    let name = scan.iu("r_name").unwrap();
    let mut plan = Selection::new(
        Box::new(scan),
        Exp::call("eq", Exp::iu(&name), Exp::string("ASIA")).unwrap(),
    );

    let rows = collect(&f, &mut plan, &[key.clone(), name]);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0].as_i64(), 2);
    assert_eq!(rows[0][1].as_str(), "ASIA");
}

#[test]
fn date_range_selection() {
    let f = fixture();
    let scan = Scan::new("orders").unwrap();
    let orderkey = scan.iu("o_orderkey").unwrap();
    let orderdate = scan.iu("o_orderdate").unwrap();
    let in_1994 = Exp::and(
        Exp::binary(
            morsel::BinOp::Ge,
            Exp::iu(&orderdate),
            Exp::date(to_julian(1994, 1, 1)),
        ),
        Exp::binary(
            morsel::BinOp::Le,
            Exp::iu(&orderdate),
            Exp::date(to_julian(1994, 12, 31)),
        ),
    );
    let mut plan = Selection::new(Box::new(scan), in_1994);

    let mut rows = collect(&f, &mut plan, &[orderkey]);
    rows.sort_by_key(|r| r[0].as_i64());
    let keys: Vec<i64> = rows.iter().map(|r| r[0].as_i64()).collect();
    assert_eq!(keys, [10, 11, 12, 13]);
}

#[test]
fn extract_year_selection() {
    let f = fixture();
    let scan = Scan::new("orders").unwrap();
    let orderkey = scan.iu("o_orderkey").unwrap();
    let orderdate = scan.iu("o_orderdate").unwrap();
    let mut plan = Selection::new(
        Box::new(scan),
        Exp::binary(
            morsel::BinOp::Eq,
            Exp::extract_year(Exp::iu(&orderdate)),
            Exp::int32(1995),
        ),
    );

    let rows = collect(&f, &mut plan, &[orderkey]);
    assert_eq!(rows.len(), 2);
}

#[test]
fn like_selections() {
    let f = fixture();
    for (pattern, expected) in [
        ("green%", vec![1i64]),
        ("%duck", vec![3]),
        ("%metal%", vec![1]),
        ("%plastic%", vec![]),
    ] {
        let scan = Scan::new("part").unwrap();
        let partkey = scan.iu("p_partkey").unwrap();
        let name = scan.iu("p_name").unwrap();
        let mut plan = Selection::new(
            Box::new(scan),
            Exp::like(Exp::iu(&name), pattern).unwrap(),
        );
        let mut rows = collect(&f, &mut plan, &[partkey]);
        rows.sort_by_key(|r| r[0].as_i64());
        let keys: Vec<i64> = rows.iter().map(|r| r[0].as_i64()).collect();
        assert_eq!(keys, expected, "pattern {pattern}");
    }
}

#[test]
fn short_circuit_and_guards_division() {
    let f = fixture();
    let scan = Scan::new("part").unwrap();
    let partkey = scan.iu("p_partkey").unwrap();
    let size = scan.iu("p_size").unwrap();
    // the right operand divides by p_size; the row with size 0 must be
    // rejected by the left operand without evaluating the division
    let predicate = Exp::and(
        Exp::binary(morsel::BinOp::Ne, Exp::iu(&size), Exp::int32(0)),
        Exp::binary(
            morsel::BinOp::Gt,
            Exp::binary(morsel::BinOp::Div, Exp::int32(100), Exp::iu(&size)),
            Exp::int32(10),
        ),
    );
    let mut plan = Selection::new(Box::new(scan), predicate);

    let rows = collect(&f, &mut plan, &[partkey]);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0].as_i64(), 1);
}

#[test]
fn case_expression_map() {
    let f = fixture();
    let scan = Scan::new("region").unwrap();
    let key = scan.iu("r_regionkey").unwrap();
    let case = Exp::case(
        vec![(
            Exp::binary(morsel::BinOp::Eq, Exp::iu(&key), Exp::int32(2)),
            Exp::int32(1),
        )],
        Exp::int32(0),
        TypeKind::Int32,
    );
    let map = Map::new(Box::new(scan), case, "is_asia", TypeKind::Int32);
    let flag = map.iu();
    let mut plan = map;

    let mut rows = collect(&f, &mut plan, &[key, flag]);
    rows.sort_by_key(|r| r[0].as_i64());
    let flags: Vec<i64> = rows.iter().map(|r| r[1].as_i64()).collect();
    assert_eq!(flags, [0, 0, 1, 0, 0]);
}

// ============================================================================
// Joins
// ============================================================================

#[test]
fn nation_region_join() {
    let f = fixture();
    let region = Scan::new("region").unwrap();
    let r_regionkey = region.iu("r_regionkey").unwrap();
    let r_name = region.iu("r_name").unwrap();
    let nation = Scan::new("nation").unwrap();
    let n_name = nation.iu("n_name").unwrap();
    let n_regionkey = nation.iu("n_regionkey").unwrap();

    let mut plan = InnerJoin::new(
        Box::new(region),
        Box::new(nation),
        vec![r_regionkey],
        vec![n_regionkey],
        None,
    );

    let mut rows = collect(&f, &mut plan, &[n_name, r_name]);
    rows.sort_by(|a, b| a[0].as_str().cmp(b[0].as_str()));
    let pairs: Vec<(String, String)> = rows
        .iter()
        .map(|r| (r[0].as_str().to_string(), r[1].as_str().to_string()))
        .collect();
    assert_eq!(
        pairs,
        [
            ("BRAZIL".to_string(), "AMERICA".to_string()),
            ("CHINA".to_string(), "ASIA".to_string()),
            ("FRANCE".to_string(), "EUROPE".to_string()),
            ("INDIA".to_string(), "ASIA".to_string()),
        ]
    );
}

#[test]
fn join_with_residual_condition() {
    let f = fixture();
    let orders = Scan::new("orders").unwrap();
    let o_orderkey = orders.iu("o_orderkey").unwrap();
    let o_totalprice = orders.iu("o_totalprice").unwrap();
    let lineitem = Scan::new("lineitem").unwrap();
    let l_orderkey = lineitem.iu("l_orderkey").unwrap();
    let l_extendedprice = lineitem.iu("l_extendedprice").unwrap();

    // keep only items priced above half the order total
    let condition = Exp::binary(
        morsel::BinOp::Gt,
        Exp::iu(&l_extendedprice),
        Exp::binary(
            morsel::BinOp::Div,
            Exp::iu(&o_totalprice),
            Exp::double(2.0),
        ),
    );
    let mut plan = InnerJoin::new(
        Box::new(orders),
        Box::new(lineitem),
        vec![o_orderkey.clone()],
        vec![l_orderkey.clone()],
        Some(condition),
    );

    let mut expected = 0usize;
    for (i, &ok) in L_ORDERKEY.iter().enumerate() {
        let order = O_ORDERKEY.iter().position(|&o| o == ok).unwrap();
        let total = [3000.0, 1500.0, 500.0, 800.0, 700.0, 2000.0][order];
        if L_EXTENDEDPRICE[i] > total / 2.0 {
            expected += 1;
        }
    }
    let rows = collect(&f, &mut plan, &[l_orderkey, l_extendedprice]);
    assert_eq!(rows.len(), expected);
}

// ============================================================================
// Aggregation
// ============================================================================

#[test]
fn ungrouped_count() {
    let f = fixture();
    let scan = Scan::new("lineitem").unwrap();
    let mut agg = Aggregation::new(Box::new(scan), IuSet::new());
    let count = agg.add_aggregate(Aggregate::count("cnt"));
    let mut plan = agg;

    let rows = collect(&f, &mut plan, &[count]);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0].as_i64(), L_ORDERKEY.len() as i64);
}

#[test]
fn grouped_sum_min_max() {
    let f = fixture();
    let scan = Scan::new("lineitem").unwrap();
    let flag = scan.iu("l_returnflag").unwrap();
    let price = scan.iu("l_extendedprice").unwrap();
    let mut agg = Aggregation::new(Box::new(scan), IuSet::from_slice(&[flag.clone()]));
    let total = agg.add_aggregate(Aggregate::sum("total", &price));
    let cheapest = agg.add_aggregate(Aggregate::min("cheapest", &price));
    let priciest = agg.add_aggregate(Aggregate::max("priciest", &price));
    let count = agg.add_aggregate(Aggregate::count("cnt"));
    let mut plan = agg;

    let mut rows = collect(&f, &mut plan, &[flag, total, cheapest, priciest, count]);
    rows.sort_by_key(|r| r[0].as_i64());

    let expect = |wanted: u8| -> (f64, f64, f64, i64) {
        let mut sum = 0.0;
        let mut min = f64::MAX;
        let mut max = f64::MIN;
        let mut count = 0;
        for (i, &flag) in L_RETURNFLAG.iter().enumerate() {
            if flag == wanted {
                sum += L_EXTENDEDPRICE[i];
                min = min.min(L_EXTENDEDPRICE[i]);
                max = max.max(L_EXTENDEDPRICE[i]);
                count += 1;
            }
        }
        (sum, min, max, count)
    };

    assert_eq!(rows.len(), 3);
    for row in &rows {
        let (sum, min, max, count) = expect(row[0].as_i64() as u8);
        assert!((row[1].as_f64() - sum).abs() < 1e-9);
        assert!((row[2].as_f64() - min).abs() < 1e-9);
        assert!((row[3].as_f64() - max).abs() < 1e-9);
        assert_eq!(row[4].as_i64(), count);
    }
}

#[test]
fn distinct_flag_status_pairs() {
    let f = fixture();
    let scan = Scan::new("lineitem").unwrap();
    let flag = scan.iu("l_returnflag").unwrap();
    let status = scan.iu("l_linestatus").unwrap();
    let mut agg = Aggregation::new(
        Box::new(scan),
        IuSet::from_slice(&[flag.clone(), status.clone()]),
    );
    let count = agg.add_aggregate(Aggregate::count("cnt"));
    let mut plan = agg;

    let rows = collect(&f, &mut plan, &[flag, status, count]);
    assert_eq!(rows.len(), 4);
    let total: i64 = rows.iter().map(|r| r[2].as_i64()).sum();
    assert_eq!(total, L_ORDERKEY.len() as i64);
}

#[test]
fn aggregation_agrees_across_schedulers() {
    let run = |kind: SchedulerKind| -> Vec<(i64, f64)> {
        let f = fixture_with(kind);
        let scan = Scan::new("lineitem").unwrap();
        let flag = scan.iu("l_returnflag").unwrap();
        let price = scan.iu("l_extendedprice").unwrap();
        let mut agg = Aggregation::new(Box::new(scan), IuSet::from_slice(&[flag.clone()]));
        let total = agg.add_aggregate(Aggregate::sum("total", &price));
        let mut plan = agg;
        let mut rows = collect(&f, &mut plan, &[flag, total]);
        rows.sort_by_key(|r| r[0].as_i64());
        rows.iter()
            .map(|r| (r[0].as_i64(), r[1].as_f64()))
            .collect()
    };

    assert_eq!(run(SchedulerKind::Simple), run(SchedulerKind::Multithreaded));
}

// ============================================================================
// Sort
// ============================================================================

#[test]
fn two_key_ascending_sort() {
    let f = fixture();
    let scan = Scan::new("lineitem").unwrap();
    let orderkey = scan.iu("l_orderkey").unwrap();
    let linenumber = scan.iu("l_linenumber").unwrap();
    let flag = scan.iu("l_returnflag").unwrap();
    let status = scan.iu("l_linestatus").unwrap();

    // four rows: (N,F), (R,F), (N,O), (A,F)
    let filter = Exp::and(
        Exp::binary(morsel::BinOp::Eq, Exp::iu(&linenumber), Exp::int32(1)),
        Exp::binary(morsel::BinOp::Le, Exp::iu(&orderkey), Exp::int64(13)),
    );
    let selected = Selection::new(Box::new(scan), filter);
    let mut plan = Sort::new(
        Box::new(selected),
        vec![flag.clone(), status.clone()],
        vec![false, false],
    );

    let rows = collect(&f, &mut plan, &[flag, status]);
    let pairs: Vec<(u8, u8)> = rows
        .iter()
        .map(|r| (r[0].as_i64() as u8, r[1].as_i64() as u8))
        .collect();
    assert_eq!(
        pairs,
        [(b'A', b'F'), (b'N', b'F'), (b'N', b'O'), (b'R', b'F')]
    );
}

#[test]
fn descending_sort_on_aggregate() {
    let f = fixture();
    let scan = Scan::new("lineitem").unwrap();
    let flag = scan.iu("l_returnflag").unwrap();
    let price = scan.iu("l_extendedprice").unwrap();
    let mut agg = Aggregation::new(Box::new(scan), IuSet::from_slice(&[flag.clone()]));
    let total = agg.add_aggregate(Aggregate::sum("total", &price));
    let mut plan = Sort::new(Box::new(agg), vec![total.clone()], vec![true]);

    let rows = collect(&f, &mut plan, &[flag, total]);
    let totals: Vec<f64> = rows.iter().map(|r| r[1].as_f64()).collect();
    assert!(totals.windows(2).all(|w| w[0] >= w[1]));
    assert_eq!(rows.len(), 3);
}

// ============================================================================
// The full Q5 shape
// ============================================================================

#[test]
fn q5_on_the_mini_dataset() {
    let f = fixture();

    let region = Scan::new("region").unwrap();
    let r_regionkey = region.iu("r_regionkey").unwrap();
    let r_name = region.iu("r_name").unwrap();
    let asia = Selection::new(
        Box::new(region),
        Exp::call("eq", Exp::iu(&r_name), Exp::string("ASIA")).unwrap(),
    );

    let nation = Scan::new("nation").unwrap();
    let n_nationkey = nation.iu("n_nationkey").unwrap();
    let n_regionkey = nation.iu("n_regionkey").unwrap();
    let n_name = nation.iu("n_name").unwrap();
    let join_region = InnerJoin::new(
        Box::new(asia),
        Box::new(nation),
        vec![r_regionkey],
        vec![n_regionkey],
        None,
    );

    let customer = Scan::new("customer").unwrap();
    let c_custkey = customer.iu("c_custkey").unwrap();
    let c_nationkey = customer.iu("c_nationkey").unwrap();
    let join_customer = InnerJoin::new(
        Box::new(join_region),
        Box::new(customer),
        vec![n_nationkey.clone()],
        vec![c_nationkey],
        None,
    );

    let orders = Scan::new("orders").unwrap();
    let o_orderkey = orders.iu("o_orderkey").unwrap();
    let o_custkey = orders.iu("o_custkey").unwrap();
    let o_orderdate = orders.iu("o_orderdate").unwrap();
    let orders_1994 = Selection::new(
        Box::new(orders),
        Exp::and(
            Exp::binary(
                morsel::BinOp::Ge,
                Exp::iu(&o_orderdate),
                Exp::date(to_julian(1994, 1, 1)),
            ),
            Exp::binary(
                morsel::BinOp::Le,
                Exp::iu(&o_orderdate),
                Exp::date(to_julian(1994, 12, 31)),
            ),
        ),
    );
    let join_orders = InnerJoin::new(
        Box::new(join_customer),
        Box::new(orders_1994),
        vec![c_custkey],
        vec![o_custkey],
        None,
    );

    let lineitem = Scan::new("lineitem").unwrap();
    let l_orderkey = lineitem.iu("l_orderkey").unwrap();
    let l_suppkey = lineitem.iu("l_suppkey").unwrap();
    let l_extendedprice = lineitem.iu("l_extendedprice").unwrap();
    let l_discount = lineitem.iu("l_discount").unwrap();
    let join_lineitem = InnerJoin::new(
        Box::new(join_orders),
        Box::new(lineitem),
        vec![o_orderkey],
        vec![l_orderkey],
        None,
    );

    let supplier = Scan::new("supplier").unwrap();
    let s_suppkey = supplier.iu("s_suppkey").unwrap();
    let s_nationkey = supplier.iu("s_nationkey").unwrap();
    let join_supplier = InnerJoin::new(
        Box::new(supplier),
        Box::new(join_lineitem),
        vec![s_suppkey, s_nationkey],
        vec![l_suppkey, n_nationkey.clone()],
        None,
    );

    let revenue_exp = Exp::binary(
        morsel::BinOp::Mul,
        Exp::iu(&l_extendedprice),
        Exp::binary(morsel::BinOp::Sub, Exp::double(1.0), Exp::iu(&l_discount)),
    );
    let map = Map::new(Box::new(join_supplier), revenue_exp, "revenue", TypeKind::Double);
    let discounted = map.iu();

    let mut agg = Aggregation::new(Box::new(map), IuSet::from_slice(&[n_name.clone()]));
    let revenue = agg.add_aggregate(Aggregate::sum("revenue", &discounted));
    let mut plan = Sort::new(Box::new(agg), vec![revenue.clone()], vec![true]);

    let rows = collect(&f, &mut plan, &[n_name, revenue]);
    // hand-derived: order 10 -> cust 1 (CHINA) item via supplier 1 (CHINA);
    // order 11 -> cust 2 (INDIA) item via supplier 2 (INDIA)
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0].as_str(), "INDIA");
    assert!((rows[0][1].as_f64() - 1200.0).abs() < 1e-9);
    assert_eq!(rows[1][0].as_str(), "CHINA");
    assert!((rows[1][1].as_f64() - 900.0).abs() < 1e-9);
}

// ============================================================================
// Replays
// ============================================================================

#[test]
fn plan_replays_across_runs() {
    let mut f = fixture();
    f.config.runs = 3;
    let scan = Scan::new("region").unwrap();
    let key = scan.iu("r_regionkey").unwrap();
    let mut plan = scan;

    let rows = collect(&f, &mut plan, &[key]);
    // three runs, five rows each
    assert_eq!(rows.len(), 15);
}
