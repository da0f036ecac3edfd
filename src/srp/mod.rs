//! The source-routed ad-hoc routing subsystem: wire formats, protocol
//! state tables, the routing element, the link cache, pluggable link
//! metrics, and header strip/unstrip helpers.

pub mod link_cache;
pub mod metric;
pub mod route_table;
pub mod strip;
pub mod tables;
pub mod wire;

pub use link_cache::{LinkCache, LinkTable};
pub use metric::{DeliveryRateSource, LinkMetric, MetricValue};
pub use route_table::SrpRouteTable;
pub use strip::{StripSrpHeader, UnstripSrpHeader};

use crate::registry::ElementRegistry;

pub fn register_all(reg: &mut ElementRegistry) {
    reg.register("LinkTable", || Box::new(LinkTable::default()));
    reg.register("SrpRouteTable", || Box::new(SrpRouteTable::default()));
    reg.register("StripSrpHeader", || Box::new(strip::StripSrpHeader));
    reg.register("UnstripSrpHeader", || Box::new(strip::UnstripSrpHeader));
    reg.register("HopCountMetric", || Box::new(metric::HopCountMetric));
    reg.register("EtxMetric", || Box::new(metric::EtxMetric::default()));
    reg.register("E2eLossMetric", || Box::new(metric::E2eLossMetric::default()));
    reg.register("ThresholdMetric", || Box::new(metric::ThresholdMetric::default()));
    reg.register("BottleneckMetric", || Box::new(metric::BottleneckMetric::default()));
    reg.register("YarvisMetric", || Box::new(metric::YarvisMetric::default()));
}
