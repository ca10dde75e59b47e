use annotator_core::{normalize_whitespace, NodeId, Result, Selector};
use annotator_engine::{AnnotationPass, PassContext, Region};

use crate::text::{query_text, sel, text_of};

/// Labels the visible settings page: grouped sections, their checkboxes and
/// sliders, and navigation rows that show a current value.
pub struct SettingsPass {
    region: Region,
    content: Selector,
    item: Selector,
    header: Selector,
    checkbox_label: Selector,
    checkbox: Selector,
    checkbox_text: Selector,
    slider: Selector,
    range: Selector,
    range_label: Selector,
    range_value: Selector,
    row: Selector,
    current_value: Selector,
}

impl SettingsPass {
    pub fn new() -> Result<Self> {
        let settings = sel("#Settings")?;
        Ok(Self {
            region: Region::new("settings", settings.clone()).on_inserted(settings),
            content: sel(".Transition_slide-active .settings-content")?,
            item: sel(".settings-item")?,
            header: sel("h4.settings-item-header")?,
            checkbox_label: sel("label.Checkbox")?,
            checkbox: sel(r#"input[type="checkbox"]"#)?,
            checkbox_text: sel("span.label")?,
            slider: sel(".RangeSlider")?,
            range: sel(r#"input[type="range"]"#)?,
            range_label: sel(".slider-top-row .label")?,
            range_value: sel(".slider-top-row .value")?,
            row: sel(".ListItem .ListItem-button")?,
            current_value: sel(".settings-item__current-value")?,
        })
    }

    fn label_group(&self, ctx: &mut PassContext<'_>, item: NodeId) -> Result<()> {
        let Some(header) = query_text(ctx.tree(), item, &self.header) else {
            return Ok(());
        };

        let mut writes = Vec::new();
        {
            let tree = ctx.tree();
            for label in self.checkbox_label.query_all(tree, item) {
                let input = self.checkbox.query(tree, label);
                let text = query_text(tree, label, &self.checkbox_text);
                if let (Some(input), Some(text)) = (input, text) {
                    if tree.attribute(input, "aria-label").is_none() {
                        writes.push((input, format!("{header}: {text}")));
                    }
                }
            }
        }

        ctx.annotate(item, |ctx| {
            ctx.set_attribute(item, "role", "group")?;
            ctx.set_attribute(item, "aria-label", &header)?;
            for (input, label) in &writes {
                ctx.set_attribute(*input, "aria-label", label)?;
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Slider labels are set once; the spoken value follows every change.
    fn label_slider(&self, ctx: &mut PassContext<'_>, item: NodeId) -> Result<()> {
        let tree = ctx.tree();
        let Some(slider) = self.slider.query(tree, item) else {
            return Ok(());
        };
        let Some(input) = self.range.query(tree, slider) else {
            return Ok(());
        };
        let label = query_text(tree, slider, &self.range_label)
            .filter(|_| tree.attribute(input, "aria-label").is_none());
        let value = query_text(tree, slider, &self.range_value);

        if let Some(label) = label {
            ctx.set_attribute(input, "aria-label", &label)?;
        }
        if let Some(value) = value {
            ctx.set_attribute(input, "aria-valuetext", &value)?;
        }
        Ok(())
    }

    fn label_row(&self, ctx: &mut PassContext<'_>, row: NodeId) -> Result<()> {
        let tree = ctx.tree();
        if self.checkbox.query(tree, row).is_some() {
            return Ok(());
        }
        let Some(value) = query_text(tree, row, &self.current_value) else {
            return Ok(());
        };
        let base = normalize_whitespace(&text_of(tree, row).replacen(&value, "", 1));
        ctx.set_attribute(row, "aria-label", &format!("{base}: {value}"))?;
        Ok(())
    }
}

impl AnnotationPass for SettingsPass {
    fn name(&self) -> &str {
        "settings"
    }

    fn region(&self) -> Region {
        self.region.clone()
    }

    fn run(&mut self, ctx: &mut PassContext<'_>, root: NodeId) -> Result<()> {
        let Some(content) = self.content.query(ctx.tree(), root) else {
            return Ok(());
        };

        for item in self.item.query_all(ctx.tree(), content) {
            self.label_group(ctx, item)?;
            self.label_slider(ctx, item)?;
        }
        for row in self.row.query_all(ctx.tree(), content) {
            self.label_row(ctx, row)?;
        }
        Ok(())
    }
}
