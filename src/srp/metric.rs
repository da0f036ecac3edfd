//! Link-quality metrics: the pluggable policy deciding which routes are
//! better.
//!
//! A metric element implements [`LinkMetric`]: a total order over metric
//! values (with an invalid sentinel that is always worst), per-link
//! measurement, invalid-propagating route composition, and a lossy
//! one-byte wire scaling. Measurements come from a delivery-ratio
//! provider reached through the [`DeliveryRateSource`] interface; the
//! probe machinery behind it is an external collaborator.

use crate::config::args::Args;
use crate::element::{Context, Element, ElementRef};
use crate::error::ErrorHandler;
use crate::net::EtherAddr;
use crate::router::Router;
use std::any::Any;

/// A link or route metric value; `good == false` is the invalid
/// sentinel, worse than every valid value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricValue {
    val: u32,
    good: bool,
}

impl MetricValue {
    pub fn new(val: u32) -> MetricValue {
        MetricValue { val, good: true }
    }

    pub const fn invalid() -> MetricValue {
        MetricValue { val: 777_777, good: false }
    }

    pub fn val(&self) -> u32 {
        self.val
    }

    pub fn good(&self) -> bool {
        self.good
    }
}

/// Delivery-ratio measurements for links to radio neighbors, in percent.
/// Forward is this node toward the neighbor.
pub trait DeliveryRateSource {
    fn forward_rate(&self, neighbor: EtherAddr) -> Option<u32>;
    fn reverse_rate(&self, neighbor: EtherAddr) -> Option<u32>;
}

/// The metric policy interface.
pub trait LinkMetric {
    /// True iff `a` is strictly better than `b`. Callers should only
    /// rely on the result when both values are good; implementations
    /// order the invalid sentinel worst regardless.
    fn metric_val_lt(&self, a: MetricValue, b: MetricValue) -> bool;

    /// The 1-hop metric toward neighbor `n`. `data_sender` is true when
    /// this node transmits data over the link, which matters to metrics
    /// that differ per direction.
    fn get_link_metric(&self, router: &Router, n: EtherAddr, data_sender: bool) -> MetricValue;

    /// The metric of a route extended at its end by a link; invalid
    /// inputs give an invalid result.
    fn append_metric(&self, r: MetricValue, l: MetricValue) -> MetricValue;

    /// The metric of a route extended at its beginning; commutative
    /// metrics inherit `append_metric`.
    fn prepend_metric(&self, r: MetricValue, l: MetricValue) -> MetricValue {
        self.append_metric(r, l)
    }

    /// Lossy scaling into the one-byte wire encoding.
    fn scale_to_char(&self, m: MetricValue) -> u8;

    /// Inverse of `scale_to_char` up to its loss.
    fn unscale_from_char(&self, c: u8) -> MetricValue;
}

fn rates(
    router: &Router,
    source: Option<ElementRef>,
    n: EtherAddr,
) -> Option<(u32, u32)> {
    let source = source?;
    router.with_element(source.0, |e| {
        let s = e.as_delivery_rate_source()?;
        Some((s.forward_rate(n)?, s.reverse_rate(n)?))
    })?
}

macro_rules! metric_element_boilerplate {
    ($class:literal) => {
        fn class_name(&self) -> &'static str {
            $class
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }

        fn port_count(&self) -> &'static str {
            "0/0"
        }

        fn cast(&self, name: &str) -> bool {
            name == $class || name == "LinkMetric"
        }

        fn as_metric(&self) -> Option<&dyn LinkMetric> {
            Some(self)
        }
    };
}

/// Parses a mandatory `LINKSTAT` reference that must provide delivery
/// rates.
fn configure_rate_source(
    args: Vec<String>,
    ctx: &Context<'_>,
    errh: &mut dyn ErrorHandler,
) -> Result<ElementRef, ()> {
    let mut ls = ElementRef(usize::MAX);
    let mut parser = Args::new(args, ctx, errh);
    parser.read_mp("LINKSTAT", &mut ls);
    parser.complete()?;
    let ok = ctx.with_element(ls, |e| e.as_delivery_rate_source().is_some()).unwrap_or(false);
    if !ok {
        let _ = errh.error("LINKSTAT element does not provide delivery rates");
        return Err(());
    }
    Ok(ls)
}

// --- minimum hop count ----------------------------------------------------

/// Minimum hop count: every link costs one.
#[derive(Default)]
pub struct HopCountMetric;

impl Element for HopCountMetric {
    metric_element_boilerplate!("HopCountMetric");
}

impl LinkMetric for HopCountMetric {
    fn metric_val_lt(&self, a: MetricValue, b: MetricValue) -> bool {
        a.val() < b.val()
    }

    fn get_link_metric(&self, _router: &Router, _n: EtherAddr, _data_sender: bool) -> MetricValue {
        MetricValue::new(1)
    }

    fn append_metric(&self, r: MetricValue, l: MetricValue) -> MetricValue {
        if !r.good() || !l.good() {
            MetricValue::invalid()
        } else {
            MetricValue::new(r.val() + l.val())
        }
    }

    fn scale_to_char(&self, m: MetricValue) -> u8 {
        m.val().min(0xff) as u8
    }

    fn unscale_from_char(&self, c: u8) -> MetricValue {
        MetricValue::new(c as u32)
    }
}

// --- expected transmission count ------------------------------------------

/// Expected transmission count: `100 * 100 * 100 / (fwd * rev)`, summed
/// along the route. 100 means a perfect link.
pub struct EtxMetric {
    ls: Option<ElementRef>,
}

impl Default for EtxMetric {
    fn default() -> EtxMetric {
        EtxMetric { ls: None }
    }
}

impl Element for EtxMetric {
    metric_element_boilerplate!("EtxMetric");

    fn configure(
        &mut self,
        args: Vec<String>,
        ctx: &Context<'_>,
        errh: &mut dyn ErrorHandler,
    ) -> Result<(), ()> {
        self.ls = Some(configure_rate_source(args, ctx, errh)?);
        Ok(())
    }
}

impl LinkMetric for EtxMetric {
    fn metric_val_lt(&self, a: MetricValue, b: MetricValue) -> bool {
        a.val() < b.val()
    }

    fn get_link_metric(&self, router: &Router, n: EtherAddr, _data_sender: bool) -> MetricValue {
        // ETX is symmetric; the direction parameter would matter only if
        // the computation corrected for ACK sizes.
        let Some((fwd, rev)) = rates(router, self.ls, n) else {
            return MetricValue::invalid();
        };
        if fwd == 0 || rev == 0 {
            return MetricValue::invalid();
        }
        let fwd = fwd.min(100);
        let rev = rev.min(100);
        MetricValue::new((100 * 100 * 100) / (fwd * rev))
    }

    fn append_metric(&self, r: MetricValue, l: MetricValue) -> MetricValue {
        if !r.good() || !l.good() {
            MetricValue::invalid()
        } else {
            MetricValue::new(r.val() + l.val())
        }
    }

    fn scale_to_char(&self, m: MetricValue) -> u8 {
        if !m.good() || m.val() > 0xff * 10 {
            0xff
        } else {
            (m.val() / 10) as u8
        }
    }

    fn unscale_from_char(&self, c: u8) -> MetricValue {
        MetricValue::new(c as u32 * 10)
    }
}

// --- end-to-end delivery ratio --------------------------------------------

/// End-to-end delivery ratio: the product of per-link ratios; larger is
/// better.
pub struct E2eLossMetric {
    ls: Option<ElementRef>,
    twoway: bool,
}

impl Default for E2eLossMetric {
    fn default() -> E2eLossMetric {
        E2eLossMetric { ls: None, twoway: false }
    }
}

impl Element for E2eLossMetric {
    metric_element_boilerplate!("E2eLossMetric");

    fn configure(
        &mut self,
        args: Vec<String>,
        ctx: &Context<'_>,
        errh: &mut dyn ErrorHandler,
    ) -> Result<(), ()> {
        let mut ls = ElementRef(usize::MAX);
        let mut twoway = self.twoway;
        let mut parser = Args::new(args, ctx, errh);
        parser.read_mp("LINKSTAT", &mut ls).read("TWOWAY", &mut twoway);
        parser.complete()?;
        let ok = ctx.with_element(ls, |e| e.as_delivery_rate_source().is_some()).unwrap_or(false);
        if !ok {
            return errh.error("LINKSTAT element does not provide delivery rates");
        }
        self.ls = Some(ls);
        self.twoway = twoway;
        Ok(())
    }
}

impl LinkMetric for E2eLossMetric {
    fn metric_val_lt(&self, a: MetricValue, b: MetricValue) -> bool {
        a.val() > b.val()
    }

    fn get_link_metric(&self, router: &Router, n: EtherAddr, data_sender: bool) -> MetricValue {
        let Some((mut fwd, mut rev)) = rates(router, self.ls, n) else {
            return MetricValue::invalid();
        };
        // The provider's forward direction is this node transmitting; a
        // data receiver sees the link the other way around.
        if !data_sender {
            std::mem::swap(&mut fwd, &mut rev);
        }
        if fwd == 0 || (self.twoway && rev == 0) {
            return MetricValue::invalid();
        }
        let mut val = fwd.min(100);
        if self.twoway {
            val = val * rev.min(100) / 100;
        }
        MetricValue::new(val)
    }

    fn append_metric(&self, r: MetricValue, l: MetricValue) -> MetricValue {
        if !r.good() || !l.good() {
            MetricValue::invalid()
        } else {
            MetricValue::new(r.val() * l.val() / 100)
        }
    }

    fn scale_to_char(&self, m: MetricValue) -> u8 {
        m.val().min(0xff) as u8
    }

    fn unscale_from_char(&self, c: u8) -> MetricValue {
        MetricValue::new(c as u32)
    }
}

// --- threshold ------------------------------------------------------------

/// Binary good/bad: a link counts as one hop if its delivery ratio meets
/// the threshold, and is unusable otherwise.
pub struct ThresholdMetric {
    ls: Option<ElementRef>,
    thresh: u32,
    twoway: bool,
}

impl Default for ThresholdMetric {
    fn default() -> ThresholdMetric {
        ThresholdMetric { ls: None, thresh: 63, twoway: false }
    }
}

impl Element for ThresholdMetric {
    metric_element_boilerplate!("ThresholdMetric");

    fn configure(
        &mut self,
        args: Vec<String>,
        ctx: &Context<'_>,
        errh: &mut dyn ErrorHandler,
    ) -> Result<(), ()> {
        let mut ls = ElementRef(usize::MAX);
        let mut thresh = self.thresh;
        let mut twoway = self.twoway;
        let mut parser = Args::new(args, ctx, errh);
        parser
            .read_mp("LINKSTAT", &mut ls)
            .read("THRESH", &mut thresh)
            .read("TWOWAY", &mut twoway);
        parser.complete()?;
        if thresh > 100 {
            return errh.error("THRESH keyword argument is too large, it must be <= 100 percent");
        }
        let ok = ctx.with_element(ls, |e| e.as_delivery_rate_source().is_some()).unwrap_or(false);
        if !ok {
            return errh.error("LINKSTAT element does not provide delivery rates");
        }
        self.ls = Some(ls);
        self.thresh = thresh;
        self.twoway = twoway;
        Ok(())
    }
}

impl LinkMetric for ThresholdMetric {
    fn metric_val_lt(&self, a: MetricValue, b: MetricValue) -> bool {
        if a.good() && b.good() {
            a.val() < b.val()
        } else {
            a.good()
        }
    }

    fn get_link_metric(&self, router: &Router, n: EtherAddr, data_sender: bool) -> MetricValue {
        let Some((mut fwd, mut rev)) = rates(router, self.ls, n) else {
            return MetricValue::invalid();
        };
        if !data_sender {
            std::mem::swap(&mut fwd, &mut rev);
        }
        if fwd == 0 || rev == 0 {
            return MetricValue::invalid();
        }
        if fwd >= self.thresh && (!self.twoway || rev >= self.thresh) {
            MetricValue::new(1)
        } else {
            MetricValue::invalid()
        }
    }

    fn append_metric(&self, r: MetricValue, l: MetricValue) -> MetricValue {
        if !r.good() || !l.good() {
            MetricValue::invalid()
        } else {
            MetricValue::new(r.val() + l.val())
        }
    }

    fn scale_to_char(&self, m: MetricValue) -> u8 {
        m.val().min(0xff) as u8
    }

    fn unscale_from_char(&self, c: u8) -> MetricValue {
        MetricValue::new(c as u32)
    }
}

// --- bottleneck -----------------------------------------------------------

/// Bottleneck delivery ratio: a route is as good as its worst link;
/// larger bottlenecks are better.
pub struct BottleneckMetric {
    ls: Option<ElementRef>,
}

impl Default for BottleneckMetric {
    fn default() -> BottleneckMetric {
        BottleneckMetric { ls: None }
    }
}

impl Element for BottleneckMetric {
    metric_element_boilerplate!("BottleneckMetric");

    fn configure(
        &mut self,
        args: Vec<String>,
        ctx: &Context<'_>,
        errh: &mut dyn ErrorHandler,
    ) -> Result<(), ()> {
        self.ls = Some(configure_rate_source(args, ctx, errh)?);
        Ok(())
    }
}

impl LinkMetric for BottleneckMetric {
    fn metric_val_lt(&self, a: MetricValue, b: MetricValue) -> bool {
        if a.good() && b.good() {
            a.val() > b.val()
        } else {
            a.good()
        }
    }

    fn get_link_metric(&self, router: &Router, n: EtherAddr, data_sender: bool) -> MetricValue {
        let Some((fwd, rev)) = rates(router, self.ls, n) else {
            return MetricValue::invalid();
        };
        let r = if data_sender { fwd } else { rev };
        if r == 0 {
            MetricValue::invalid()
        } else {
            MetricValue::new(r)
        }
    }

    fn append_metric(&self, r: MetricValue, l: MetricValue) -> MetricValue {
        if !r.good() || !l.good() {
            MetricValue::invalid()
        } else if r.val() < l.val() {
            r
        } else {
            l
        }
    }

    fn scale_to_char(&self, m: MetricValue) -> u8 {
        m.val().min(0xff) as u8
    }

    fn unscale_from_char(&self, c: u8) -> MetricValue {
        MetricValue::new(c as u32)
    }
}

// --- quantized log-loss ---------------------------------------------------

/// Quantized loss buckets: delivery ratios map onto four cost classes
/// which sum along the route.
pub struct YarvisMetric {
    ls: Option<ElementRef>,
}

impl Default for YarvisMetric {
    fn default() -> YarvisMetric {
        YarvisMetric { ls: None }
    }
}

impl Element for YarvisMetric {
    metric_element_boilerplate!("YarvisMetric");

    fn configure(
        &mut self,
        args: Vec<String>,
        ctx: &Context<'_>,
        errh: &mut dyn ErrorHandler,
    ) -> Result<(), ()> {
        self.ls = Some(configure_rate_source(args, ctx, errh)?);
        Ok(())
    }
}

impl LinkMetric for YarvisMetric {
    fn metric_val_lt(&self, a: MetricValue, b: MetricValue) -> bool {
        a.val() < b.val()
    }

    fn get_link_metric(&self, router: &Router, n: EtherAddr, data_sender: bool) -> MetricValue {
        let Some((mut fwd, mut rev)) = rates(router, self.ls, n) else {
            return MetricValue::invalid();
        };
        if !data_sender {
            std::mem::swap(&mut fwd, &mut rev);
        }
        let m = match fwd {
            90.. => 1,
            79.. => 3,
            47.. => 6,
            _ => 15,
        };
        MetricValue::new(m)
    }

    fn append_metric(&self, r: MetricValue, l: MetricValue) -> MetricValue {
        if !r.good() || !l.good() {
            MetricValue::invalid()
        } else {
            MetricValue::new(r.val() + l.val())
        }
    }

    fn scale_to_char(&self, m: MetricValue) -> u8 {
        m.val().min(0xff) as u8
    }

    fn unscale_from_char(&self, c: u8) -> MetricValue {
        MetricValue::new(c as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_propagates_through_append() {
        let m = HopCountMetric;
        let good = MetricValue::new(3);
        assert!(!m.append_metric(good, MetricValue::invalid()).good());
        assert!(!m.append_metric(MetricValue::invalid(), good).good());
        assert_eq!(m.append_metric(good, MetricValue::new(1)).val(), 4);
    }

    #[test]
    fn appending_never_improves_a_smaller_is_better_metric() {
        let m = EtxMetric::default();
        let route = MetricValue::new(250);
        let link = MetricValue::new(100);
        let combined = m.append_metric(route, link);
        assert!(!m.metric_val_lt(combined, route));
    }

    #[test]
    fn e2e_loss_prefers_larger_and_multiplies() {
        let m = E2eLossMetric::default();
        assert!(m.metric_val_lt(MetricValue::new(90), MetricValue::new(50)));
        assert_eq!(m.append_metric(MetricValue::new(80), MetricValue::new(50)).val(), 40);
    }

    #[test]
    fn bottleneck_takes_minimum() {
        let m = BottleneckMetric::default();
        assert_eq!(m.append_metric(MetricValue::new(80), MetricValue::new(50)).val(), 50);
        assert_eq!(m.append_metric(MetricValue::new(30), MetricValue::new(50)).val(), 30);
        assert!(m.metric_val_lt(MetricValue::new(90), MetricValue::new(50)));
        assert!(m.metric_val_lt(MetricValue::new(10), MetricValue::invalid()));
        assert!(!m.metric_val_lt(MetricValue::invalid(), MetricValue::new(10)));
    }

    #[test]
    fn etx_scaling_round_trips_in_wire_precision() {
        let m = EtxMetric::default();
        for c in 0..=0xffu8 {
            assert_eq!(m.scale_to_char(m.unscale_from_char(c)), c);
        }
    }
}
