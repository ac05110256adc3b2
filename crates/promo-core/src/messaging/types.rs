/// Inline keyboard (buttons) attached to the promotion card.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<InlineButton>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(label: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            callback_data: callback_data.into(),
        }
    }
}

impl InlineKeyboard {
    pub fn new(rows: Vec<Vec<InlineButton>>) -> Self {
        Self { rows }
    }

    pub fn row(mut self, buttons: Vec<InlineButton>) -> Self {
        if !buttons.is_empty() {
            self.rows.push(buttons);
        }
        self
    }

    /// Lay buttons out two per row (the last row may hold one).
    pub fn two_per_row(mut self, buttons: Vec<InlineButton>) -> Self {
        let mut iter = buttons.into_iter();
        while let Some(first) = iter.next() {
            let mut row = vec![first];
            if let Some(second) = iter.next() {
                row.push(second);
            }
            self.rows.push(row);
        }
        self
    }

    /// All callback ids, row by row.
    pub fn callbacks(&self) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .flat_map(|r| r.iter().map(|b| b.callback_data.as_str()))
    }
}
