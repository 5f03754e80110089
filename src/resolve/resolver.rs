use crate::{
    animation::samples::Interpolation,
    compose::prim_index::{ComposeContext, PrimIndex, Site},
    foundation::core::TimeCode,
    layer::model::PropertySpec,
    layer::store::LayerStore,
    layer::value::Value,
};

/// Winning sites for one property, found once and reused across time queries.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct ResolveInfo {
    /// Property name.
    pub name: String,
    /// Strongest site authoring a default value.
    pub default_site: Option<Site>,
    /// Strongest site authoring any value opinion; it answers every timed query.
    pub time_site: Option<Site>,
}

/// Scan the property sites of `index` strongest to weakest and record the winners.
pub fn compute_resolve_info(ctx: &dyn ComposeContext, index: &PrimIndex, name: &str) -> ResolveInfo {
    let store = ctx.store();
    let mut info = ResolveInfo {
        name: name.to_string(),
        ..ResolveInfo::default()
    };
    for site in index.property_sites(ctx, name) {
        let Some((has_default, has_value)) = with_site_spec(store, &site, name, |spec| {
            Some((spec.default.is_some(), spec.has_value()))
        }) else {
            continue;
        };
        if info.default_site.is_none() && has_default {
            info.default_site = Some(site.clone());
        }
        if info.time_site.is_none() && has_value {
            info.time_site = Some(site);
        }
        if info.default_site.is_some() && info.time_site.is_some() {
            break;
        }
    }
    info
}

/// Value at `time` from the winning sites recorded in `info`.
///
/// A timed query takes the strongest site with any opinion as a whole: its spline if it has
/// knots, else its time samples, else its default. Stage time maps into the site's local
/// time through the inverse of the site offset.
pub fn resolve_with_info(
    store: &LayerStore,
    info: &ResolveInfo,
    time: TimeCode,
    interpolation: Interpolation,
) -> Option<Value> {
    match time {
        TimeCode::Default => {
            let site = info.default_site.as_ref()?;
            with_site_spec(store, site, &info.name, |spec| spec.default.clone())
        }
        TimeCode::At(t) => {
            let site = info.time_site.as_ref()?;
            let local = site.offset.apply_inverse(t);
            with_site_spec(store, site, &info.name, |spec| {
                if let Some(spline) = spec.spline.as_ref().filter(|s| s.has_knots()) {
                    return spline.eval(local).map(Value::Double);
                }
                if !spec.time_samples.is_empty() {
                    return spec.time_samples.sample(local, interpolation);
                }
                spec.default.clone()
            })
        }
    }
}

/// Resolve `name` on `index` without keeping the resolve info.
#[tracing::instrument(skip(ctx, index), fields(path = %index.path()))]
pub fn resolve(
    ctx: &dyn ComposeContext,
    index: &PrimIndex,
    name: &str,
    time: TimeCode,
    interpolation: Interpolation,
) -> Option<Value> {
    let info = compute_resolve_info(ctx, index, name);
    resolve_with_info(ctx.store(), &info, time, interpolation)
}

fn with_site_spec<R>(
    store: &LayerStore,
    site: &Site,
    name: &str,
    f: impl FnOnce(&PropertySpec) -> Option<R>,
) -> Option<R> {
    let layer = store.get(&site.layer)?;
    let spec = layer.prim_spec(&site.path)?.properties.get(name)?;
    f(spec)
}

#[cfg(test)]
#[path = "../../tests/unit/resolve/resolver.rs"]
mod tests;
