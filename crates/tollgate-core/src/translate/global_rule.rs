use kube::ResourceExt;
use tollgate_api::crd::ApisixGlobalRule;
use tollgate_api::resources::Resources;
use tollgate_api::{Error, ErrorContext};

use super::plugins;
use super::{Translate, TranslateContext, Translator};

impl Translate for ApisixGlobalRule {
    fn translate(
        &self,
        _translator: &Translator,
        ctx: &TranslateContext,
    ) -> Result<Resources, Error> {
        let namespace = self.namespace().unwrap_or_default();
        let global_rules =
            plugins::declared(ctx, &namespace, &self.spec.plugins).with_fields("spec", "plugins")?;

        Ok(Resources {
            global_rules,
            ..Default::default()
        })
    }
}
