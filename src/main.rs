//! TPC-H Q5 demo.
//!
//! ```sql
//! select n_name, sum(l_extendedprice * (1 - l_discount)) as revenue
//! from customer, orders, lineitem, supplier, nation, region
//! where c_custkey = o_custkey
//!   and l_orderkey = o_orderkey
//!   and l_suppkey = s_suppkey
//!   and c_nationkey = s_nationkey
//!   and s_nationkey = n_nationkey
//!   and n_regionkey = r_regionkey
//!   and r_name = 'ASIA'
//!   and o_orderdate >= date '1994-01-01'
//!   and o_orderdate < date '1995-01-01'
//! group by n_name
//! order by revenue desc
//! ```
//!
//! Expected on scale factor 1:
//! ```text
//! INDONESIA   55502041.1697
//! VIETNAM     55295086.9967
//! CHINA       53724494.2566
//! INDIA       52035512.0002
//! JAPAN       45410175.6954
//! ```

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use morsel::expr::Exp;
use morsel::iu::IuSet;
use morsel::ops::{Aggregate, Aggregation, InnerJoin, Map, PrintSink, Scan, Selection, Sort};
use morsel::runtime::date::to_julian;
use morsel::types::TypeKind;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let region = Scan::new("region")?;
    let r_regionkey = region.iu("r_regionkey").unwrap();
    let r_name = region.iu("r_name").unwrap();
    let asia = Selection::new(
        Box::new(region),
        Exp::call("eq", Exp::iu(&r_name), Exp::string("ASIA"))?,
    );

    let nation = Scan::new("nation")?;
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

    let customer = Scan::new("customer")?;
    let c_custkey = customer.iu("c_custkey").unwrap();
    let c_nationkey = customer.iu("c_nationkey").unwrap();
    let join_customer = InnerJoin::new(
        Box::new(join_region),
        Box::new(customer),
        vec![n_nationkey.clone()],
        vec![c_nationkey],
        None,
    );

    let orders = Scan::new("orders")?;
    let o_orderkey = orders.iu("o_orderkey").unwrap();
    let o_custkey = orders.iu("o_custkey").unwrap();
    let o_orderdate = orders.iu("o_orderdate").unwrap();
    let in_1994 = Exp::call(
        "and",
        Exp::call(
            "ge",
            Exp::iu(&o_orderdate),
            Exp::date(to_julian(1994, 1, 1)),
        )?,
        Exp::call(
            "le",
            Exp::iu(&o_orderdate),
            Exp::date(to_julian(1994, 12, 31)),
        )?,
    )?;
    let orders_1994 = Selection::new(Box::new(orders), in_1994);
    let join_orders = InnerJoin::new(
        Box::new(join_customer),
        Box::new(orders_1994),
        vec![c_custkey],
        vec![o_custkey],
        None,
    );

    let lineitem = Scan::new("lineitem")?;
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

    let supplier = Scan::new("supplier")?;
    let s_suppkey = supplier.iu("s_suppkey").unwrap();
    let s_nationkey = supplier.iu("s_nationkey").unwrap();
    let join_supplier = InnerJoin::new(
        Box::new(supplier),
        Box::new(join_lineitem),
        vec![s_suppkey, s_nationkey],
        vec![l_suppkey, n_nationkey.clone()],
        None,
    );

    let revenue_exp = Exp::call(
        "mul",
        Exp::iu(&l_extendedprice),
        Exp::call("sub", Exp::double(1.0), Exp::iu(&l_discount))?,
    )?;
    let revenue_map = Map::new(
        Box::new(join_supplier),
        revenue_exp,
        "revenue",
        TypeKind::Double,
    );
    let discounted = revenue_map.iu();

    let mut group = Aggregation::new(
        Box::new(revenue_map),
        IuSet::from_slice(&[n_name.clone()]),
    );
    let revenue = group.add_aggregate(Aggregate::sum("revenue", &discounted));

    let mut plan = Sort::new(Box::new(group), vec![revenue.clone()], vec![true]);

    morsel::produce(
        &mut plan,
        &[n_name, revenue],
        &["n_name".into(), "revenue".into()],
        &mut PrintSink,
    )?;
    Ok(())
}
